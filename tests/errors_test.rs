#[cfg(test)]
mod error_tests {
    use std::error::Error;
    use std::time::Duration;
    use zerocall::errors::{CallError, ConfigError};
    use zerocall::I18n;

    fn all_errors() -> Vec<CallError> {
        vec![
            CallError::MediaAccessDenied("no camera".to_string()),
            CallError::InvalidInvitation("bad base64".to_string()),
            CallError::InvalidResponseCode("wrong type".to_string()),
            CallError::ClipboardWriteFailed("no display".to_string()),
            CallError::Negotiation("create offer: closed".to_string()),
            CallError::RemoteMediaTimeout(Duration::from_secs(30)),
            CallError::InvalidState {
                operation: "submit_response",
                state: "Idle as initiator".to_string(),
            },
        ]
    }

    #[test]
    fn test_call_error_display() {
        let error = CallError::MediaAccessDenied("Access denied".to_string());
        assert_eq!(error.to_string(), "Media access denied: Access denied");

        let error = CallError::InvalidState {
            operation: "create_invitation",
            state: "Connected as initiator".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Operation `create_invitation` not allowed while Connected as initiator"
        );
    }

    #[test]
    fn test_call_error_debug_format() {
        let error = CallError::InvalidResponseCode("Debug test".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("InvalidResponseCode"));
        assert!(debug_str.contains("Debug test"));
    }

    #[test]
    fn test_call_error_implements_error_trait() {
        let error = CallError::Negotiation("Error trait test".to_string());
        let _error_trait: &dyn Error = &error;
        assert!(error.source().is_none());
    }

    #[test]
    fn test_every_error_has_a_translation() {
        let i18n = I18n::new();
        i18n.initialize(Some("en"));
        for error in all_errors() {
            let key = error.message_key();
            let text = i18n.translate(key);
            assert_ne!(text, key, "no English text for {}", key);
            assert!(!text.is_empty());
        }
    }

    #[test]
    fn test_message_keys_are_distinct_per_failure() {
        let keys: std::collections::HashSet<_> =
            all_errors().iter().map(|e| e.message_key()).collect();
        assert_eq!(keys.len(), all_errors().len());
    }

    #[test]
    fn test_errors_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CallError>();
        assert_send_sync::<ConfigError>();
    }

    #[test]
    fn test_config_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: ConfigError = io.into();
        assert!(error.to_string().starts_with("Failed to access config file"));
        assert!(error.source().is_some());
    }
}
