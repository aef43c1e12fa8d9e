//! Field checks for user creation.

use std::sync::LazyLock;

use regex::Regex;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 64;
const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 32;

pub const ERR_PASSWORD: &str = "password must be 8 to 64 characters without spaces";
pub const ERR_PASSWORD_CONFIRMATION: &str = "passwords do not match";
pub const ERR_EMAIL: &str = "email is not valid";
pub const ERR_USERNAME: &str =
    "username must be 3 to 32 characters of letters, digits, '_' or '-'";
pub const ERR_ROLE: &str = "role must be lowercase letters, digits or '_'";

pub fn is_password_valid(password: &str) -> bool {
    let len = password.chars().count();
    (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len)
        && !password.chars().any(char::is_whitespace)
}

pub fn is_password_confirmed(password: &str, confirm: &str) -> bool {
    password == confirm
}

/// A local part, one `@`, and a domain of two or more non-empty labels.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$")
        .expect("email pattern is a valid regex")
});

pub fn is_email_valid(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn is_username_valid(username: &str) -> bool {
    let len = username.chars().count();
    (MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len)
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn is_role_valid(role: &str) -> bool {
    !role.is_empty()
        && role
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords() {
        assert!(is_password_valid("hunter2hunter2"));
        assert!(!is_password_valid("short"));
        assert!(!is_password_valid("has a space in it"));
        assert!(!is_password_valid(&"x".repeat(65)));
        assert!(is_password_confirmed("abc", "abc"));
        assert!(!is_password_confirmed("abc", "abd"));
    }

    #[test]
    fn emails() {
        assert!(is_email_valid("alice@example.com"));
        assert!(is_email_valid("a.b+c@mail.example.org"));
        assert!(!is_email_valid("alice"));
        assert!(!is_email_valid("@example.com"));
        assert!(!is_email_valid("alice@localhost"));
        assert!(!is_email_valid("alice@example..com"));
        assert!(!is_email_valid("alice@@example.com"));
        assert!(!is_email_valid("alice @example.com"));
        assert!(!is_email_valid("alice@example.com."));
    }

    #[test]
    fn usernames() {
        assert!(is_username_valid("alice_01"));
        assert!(is_username_valid("bob-the-builder"));
        assert!(!is_username_valid("al"));
        assert!(!is_username_valid("alice smith"));
        assert!(!is_username_valid("ålice"));
    }

    #[test]
    fn roles() {
        assert!(is_role_valid("admin"));
        assert!(is_role_valid("ops_2"));
        assert!(!is_role_valid(""));
        assert!(!is_role_valid("Admin"));
    }
}
