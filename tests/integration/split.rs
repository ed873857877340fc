//! Integration tests for split jobs.

use std::sync::Arc;

use pdfsmith::cancel::CancelToken;
use pdfsmith::job::{JobRequest, SplitMode};
use pdfsmith::{JobState, PdfSmithError};

use crate::common::{MissingRasterizer, Workspace, page_count};

fn file_names(paths: &[std::path::PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_split_into_parts() {
    let ws = Workspace::new();
    let book = ws.input("book.pdf", 18);

    let report = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::split(vec![book], SplitMode::FixedPartCount(4), ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    let counts: Vec<usize> = report.outputs.iter().map(|p| page_count(p)).collect();
    assert_eq!(counts, vec![5, 5, 4, 4]);
    assert_eq!(
        file_names(&report.outputs),
        vec![
            "book_part_01_of_04_pages_1-5.pdf",
            "book_part_02_of_04_pages_6-10.pdf",
            "book_part_03_of_04_pages_11-14.pdf",
            "book_part_04_of_04_pages_15-18.pdf",
        ]
    );
    assert!(ws.tracker.is_empty());
    assert!(ws.temp_files().is_empty());
}

#[tokio::test]
async fn test_extract_page_ranges() {
    let ws = Workspace::new();
    let doc = ws.input("doc.pdf", 12);

    let request = JobRequest::split(
        vec![doc],
        SplitMode::ExtractPages("1-3, 5, 10-12".into()),
        ws.output_dir(),
    )
    .with_output_name("selection.pdf");
    let report = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(request, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(file_names(&report.outputs), vec!["selection.pdf"]);
    assert_eq!(page_count(&report.outputs[0]), 7);
}

#[tokio::test]
async fn test_reversed_range_is_normalized() {
    let ws = Workspace::new();
    let doc = ws.input("doc.pdf", 6);

    let report = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::split(vec![doc], SplitMode::ExtractPages("5-1".into()), ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(page_count(&report.outputs[0]), 5);
}

#[tokio::test]
async fn test_out_of_bounds_range_fails_without_output() {
    let ws = Workspace::new();
    let doc = ws.input("doc.pdf", 3);

    let err = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::split(vec![doc], SplitMode::ExtractPages("2-9".into()), ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PdfSmithError::InvalidPageRange { .. }));
    assert!(ws.outputs().is_empty());
    assert!(ws.tracker.is_empty());
}

#[tokio::test]
async fn test_every_page() {
    let ws = Workspace::new();
    let doc = ws.input("memo.pdf", 3);

    let report = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::split(vec![doc], SplitMode::AllPages, ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        file_names(&report.outputs),
        vec![
            "memo_page_001_of_003.pdf",
            "memo_page_002_of_003.pdf",
            "memo_page_003_of_003.pdf",
        ]
    );
    assert!(report.outputs.iter().all(|p| page_count(p) == 1));
}

#[tokio::test]
async fn test_fixed_interval() {
    let ws = Workspace::new();
    let doc = ws.input("scan.pdf", 7);

    let report = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::split(vec![doc], SplitMode::FixedInterval(3), ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let counts: Vec<usize> = report.outputs.iter().map(|p| page_count(p)).collect();
    assert_eq!(counts, vec![3, 3, 1]);
    assert_eq!(
        file_names(&report.outputs)[2],
        "scan_part_03_pages_7-7.pdf"
    );
}

#[tokio::test]
async fn test_split_skips_rejected_inputs() {
    let ws = Workspace::new();
    let good = ws.input("good.pdf", 2);
    let fake = ws.raw_input("fake.pdf", b"GIF89a this is an image");

    let report = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::split(vec![fake.clone(), good], SplitMode::AllPages, ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(report.outputs.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, fake);
    assert!(report.warnings.iter().any(|w| w.contains("fake.pdf")));
}

#[tokio::test]
async fn test_split_of_only_rejected_inputs_fails() {
    let ws = Workspace::new();
    let fake = ws.raw_input("fake.pdf", b"GIF89a this is an image");

    let err = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::split(vec![fake], SplitMode::AllPages, ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PdfSmithError::Security { .. }));
    assert!(ws.outputs().is_empty());
}
