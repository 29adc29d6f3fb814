use cheetah_core::errors::{CampError, ErrorInfo};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("run", "1")
        .with_context("reason", "example")
}

#[test]
fn specification_error_surface() {
    let err = CampError::Specification(sample_info("spec.zip-length", "zip mismatch"));
    assert_eq!(err.info().code, "spec.zip-length");
    assert!(err.info().context.contains_key("run"));
    assert!(err.is_fatal());
}

#[test]
fn duplicate_parameter_error_surface() {
    let err = CampError::DuplicateParameter(sample_info("sweep.duplicate", "size declared twice"));
    assert_eq!(err.family(), "DuplicateParameter");
    assert!(err.is_fatal());
}

#[test]
fn configuration_error_surface() {
    let err = CampError::Configuration(sample_info("machine.scheduler", "unknown scheduler"));
    assert!(err.is_fatal());
}

#[test]
fn per_run_errors_are_not_fatal() {
    for err in [
        CampError::Template(sample_info("T", "unknown placeholder")),
        CampError::ResourceSpec(sample_info("R", "nprocs must be >= 1")),
        CampError::DirectoryConflict(sample_info("D", "differs")),
        CampError::Io(sample_info("I", "missing source")),
    ] {
        assert!(!err.is_fatal(), "{} should be per-run", err.family());
    }
}

#[test]
fn errors_roundtrip_through_json() {
    let err = CampError::ResourceSpec(sample_info("resource.min", "nprocs must be >= 1"));
    let bytes = serde_json::to_vec(&err).expect("encode");
    let value: serde_json::Value = serde_json::from_slice(&bytes).expect("value");
    assert_eq!(value["family"], "ResourceSpec");
    let parsed: CampError = serde_json::from_slice(&bytes).expect("decode");
    assert_eq!(parsed, err);
}
