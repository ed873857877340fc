//! Integration tests for input admission.

use std::sync::Arc;

use pdfsmith::cancel::CancelToken;
use pdfsmith::config::Limits;
use pdfsmith::engine::LopdfEngine;
use pdfsmith::job::JobRequest;
use pdfsmith::validation::SecurityValidator;
use pdfsmith::PdfSmithError;
use rstest::rstest;

use crate::common::{MissingRasterizer, Workspace};

fn validator(limits: Limits) -> SecurityValidator {
    SecurityValidator::new(limits, Arc::new(LopdfEngine::new()))
}

#[rstest]
#[case::image(b"\x89PNG\r\n\x1a\n not a pdf".as_slice())]
#[case::zip(b"PK\x03\x04 archive".as_slice())]
#[case::late_signature(b"junk before %PDF-1.7".as_slice())]
fn test_wrong_signature_never_admitted(#[case] bytes: &[u8]) {
    let ws = Workspace::new();
    let path = ws.raw_input("looks_fine.pdf", bytes);

    let err = validator(Limits::default()).validate(&path).unwrap_err();
    assert!(matches!(err, PdfSmithError::Security { .. }));
}

#[tokio::test]
async fn test_merge_rejects_disguised_file() {
    let ws = Workspace::new();
    let good = ws.input("good.pdf", 1);
    let fake = ws.raw_input("invoice.pdf", b"MZ\x90\x00 executable");

    let err = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::merge(vec![good, fake], ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PdfSmithError::Security { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(ws.outputs().is_empty());
    assert!(ws.tracker.is_empty());
}

#[test]
fn test_oversized_file_rejected() {
    let ws = Workspace::new();
    let path = ws.input("big.pdf", 3);
    let limits = Limits {
        max_file_size: 64,
        ..Default::default()
    };

    let err = validator(limits).validate(&path).unwrap_err();
    assert!(matches!(err, PdfSmithError::Security { .. }));
}

#[test]
fn test_valid_input_reports_pages() {
    let ws = Workspace::new();
    let path = ws.input("ok.pdf", 4);

    let verdict = validator(Limits::default()).validate(&path).unwrap();
    assert_eq!(verdict.page_count, 4);
    assert!(verdict.file_size > 0);
}

#[tokio::test]
async fn test_page_ceiling_applies_across_files() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 3);
    let b = ws.input("b.pdf", 3);
    let limits = Limits {
        max_total_pages: 5,
        ..Default::default()
    };
    let pipeline = pdfsmith::JobPipeline::new(
        Arc::new(LopdfEngine::new()),
        Arc::new(MissingRasterizer),
        ws.tracker.clone(),
        ws.checkpoints(),
        pdfsmith::audit::AuditLog::new(ws.path("audit"), std::process::id(), chrono::Utc::now()),
        limits,
    );

    let err = pipeline
        .run(JobRequest::merge(vec![a, b], ws.output_dir()), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PdfSmithError::Overload { .. }));
    assert!(ws.outputs().is_empty());
}

#[tokio::test]
async fn test_too_many_files_rejected_before_reading() {
    let ws = Workspace::new();
    let inputs: Vec<_> = (0..Limits::default().max_files + 1)
        .map(|i| ws.path("in").join(format!("missing_{i}.pdf")))
        .collect();

    let err = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(JobRequest::merge(inputs, ws.output_dir()), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PdfSmithError::Overload { .. }));
}
