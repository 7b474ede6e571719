/*!
Tests for error handling and error types.
*/

#[cfg(test)]
mod tests {
    use crate::error::HydrateError;
    use rehydrate_retry::RetryableError;
    use std::io;

    #[test]
    fn test_hydrate_error_display() {
        let error = HydrateError::validation("test validation error");
        assert_eq!(error.to_string(), "Validation error: test validation error");

        let error = HydrateError::codec("bad gzip header");
        assert_eq!(error.to_string(), "Codec error: bad gzip header");

        let error = HydrateError::configuration("encryption key is not configured");
        assert_eq!(
            error.to_string(),
            "Configuration error: encryption key is not configured"
        );

        assert_eq!(
            HydrateError::NotInitialized.to_string(),
            "Hydrator has not been initialized"
        );
    }

    #[test]
    fn test_hydrate_error_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = HydrateError::from(io_error);

        match error {
            HydrateError::Io(_) => {}
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_hydrate_error_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = HydrateError::from(json_error);

        assert!(matches!(error, HydrateError::Json(_)));
    }

    #[test]
    fn test_integrity_check_failed_error() {
        let error = HydrateError::IntegrityCheckFailed {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };

        assert!(error.to_string().contains("abc123"));
        assert!(error.to_string().contains("def456"));
    }

    #[test]
    fn test_persist_failed_keeps_source() {
        let error = HydrateError::PersistFailed {
            attempts: 4,
            source: Box::new(HydrateError::store_write("disk full")),
        };

        assert!(error.to_string().contains("4 attempts"));
        assert!(error.to_string().contains("disk full"));
        let source = std::error::Error::source(&error).unwrap();
        assert!(source.to_string().contains("disk full"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<HydrateError>();
        assert_sync::<HydrateError>();
    }

    #[test]
    fn test_transient_classification() {
        assert!(HydrateError::store_write("busy").is_transient());
        assert!(HydrateError::store_read("busy").is_transient());
        assert!(HydrateError::Io(io::Error::new(io::ErrorKind::Other, "x")).is_transient());

        assert!(HydrateError::codec("bad").is_permanent());
        assert!(HydrateError::configuration("no key").is_permanent());
        assert!(HydrateError::NotInitialized.is_permanent());
        assert!(HydrateError::IntegrityCheckFailed {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_permanent());
    }

    #[test]
    fn test_error_result_type() {
        fn returns_error() -> crate::Result<()> {
            Err(HydrateError::not_found("snapshot 'draft'"))
        }

        let result = returns_error();
        assert!(matches!(result, Err(HydrateError::NotFound(_))));
    }
}
