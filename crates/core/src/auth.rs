//! Administrator recognition.
//!
//! Admin access is granted when the user's display name contains one of
//! the configured keywords, case-insensitively. This is a known weak
//! check inherited from the product's history; it gates analytics, not a
//! security boundary.

pub fn is_admin_name(name: Option<&str>, keywords: &[String]) -> bool {
    let Some(name) = name else {
        return false;
    };
    let lowered = name.to_lowercase();
    keywords.iter().any(|keyword| {
        !keyword.is_empty() && lowered.contains(&keyword.to_lowercase())
    })
}

#[cfg(test)]
mod tests {
    use super::is_admin_name;

    fn keywords() -> Vec<String> {
        vec!["admin".to_owned(), "administrador".to_owned()]
    }

    #[test]
    fn containment_is_case_insensitive() {
        assert!(is_admin_name(Some("Office ADMIN"), &keywords()));
        assert!(is_admin_name(Some("administrador geral"), &keywords()));
        assert!(is_admin_name(Some("Admin"), &keywords()));
    }

    #[test]
    fn plain_names_are_not_admins() {
        assert!(!is_admin_name(Some("Alice"), &keywords()));
        assert!(!is_admin_name(None, &keywords()));
        assert!(!is_admin_name(Some(""), &keywords()));
    }

    #[test]
    fn empty_keywords_never_match() {
        assert!(!is_admin_name(Some("anyone"), &[String::new()]));
        assert!(!is_admin_name(Some("anyone"), &[]));
    }
}
