// Keeps key material out of logs and Debug output.
use std::env;

const PRINT_SECRETS_ENV: &str = "KEYRING_PRINT_SECRETS";

fn secrets_allowed() -> bool {
    env::var(PRINT_SECRETS_ENV).ok().as_deref() == Some("1")
}

/// Placeholder carrying only the length, unless KEYRING_PRINT_SECRETS=1.
pub fn redact_body(s: &str) -> String {
    if secrets_allowed() {
        return s.to_string();
    }
    format!("<redacted len={}>", s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_redacts_by_default() {
        env::remove_var(PRINT_SECRETS_ENV);
        assert_eq!(redact_body("abandon abandon"), "<redacted len=15>");
    }
}
