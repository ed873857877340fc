//! Integration tests for merge jobs.

use std::sync::Arc;

use pdfsmith::cancel::CancelToken;
use pdfsmith::config::CompressionLevel;
use pdfsmith::job::{JobOptions, JobRequest, Password};
use pdfsmith::pipeline::PipelineEvent;
use pdfsmith::{JobState, PdfSmithError};
use tokio::sync::mpsc::unbounded_channel;

use crate::common::{
    BrokenRasterizer, CopyingRasterizer, GarbageRasterizer, MissingRasterizer, Workspace,
    is_encrypted, page_count,
};

#[tokio::test]
async fn test_merge_two_files() {
    let ws = Workspace::new();
    let a = ws.input("alpha.pdf", 2);
    let b = ws.input("beta.pdf", 3);

    let report = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(JobRequest::merge(vec![a, b], ws.output_dir()), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(report.outputs.len(), 1);
    let output = &report.outputs[0];
    assert!(output.starts_with(ws.output_dir()));
    let name = output.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("alpha_merged_2files_"), "unexpected name {name}");
    assert_eq!(page_count(output), 5);

    assert!(ws.tracker.is_empty());
    assert!(ws.temp_files().is_empty());
    assert!(!ws.checkpoints().path().exists());
}

#[tokio::test]
async fn test_merge_writes_audit_trail() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let b = ws.input("b.pdf", 1);

    ws.pipeline(Arc::new(MissingRasterizer))
        .run(JobRequest::merge(vec![a, b], ws.output_dir()), &CancelToken::new())
        .await
        .unwrap();

    let audit = ws.audit_text();
    let lines: Vec<&str> = audit.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("merge_start"));
    assert!(lines[1].contains("merge_success"));
    for line in lines {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
}

#[tokio::test]
async fn test_merge_output_name_never_overwrites() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);
    let b = ws.input("b.pdf", 1);
    let pipeline = ws.pipeline(Arc::new(MissingRasterizer));

    for _ in 0..2 {
        let request = JobRequest::merge(vec![a.clone(), b.clone()], ws.output_dir())
            .with_output_name("combined");
        pipeline.run(request, &CancelToken::new()).await.unwrap();
    }

    let names: Vec<String> = ws
        .outputs()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["combined(1).pdf", "combined.pdf"]);
}

#[tokio::test]
async fn test_merge_fails_on_corrupt_input() {
    let ws = Workspace::new();
    let good = ws.input("good.pdf", 2);
    let broken = ws.raw_input("broken.pdf", b"%PDF-1.7\n1 0 obj\n<<");

    let err = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(
            JobRequest::merge(vec![good, broken], ws.output_dir()),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PdfSmithError::Corruption { .. }));
    assert!(ws.outputs().is_empty());
    assert!(ws.tracker.is_empty());
    assert!(ws.audit_text().contains("merge_error"));
}

#[tokio::test]
async fn test_conflicting_options_keep_protection() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 2);
    let b = ws.input("b.pdf", 2);
    let rasterizer = Arc::new(CopyingRasterizer::default());

    let options = JobOptions {
        apply_pdfa: true,
        protect: Some(Password::new("correct horse").unwrap()),
        ..Default::default()
    };
    let request = JobRequest::merge(vec![a, b], ws.output_dir()).with_options(options);
    let report = ws
        .pipeline(rasterizer.clone())
        .run(request, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(rasterizer.conversions(), 0);
    assert!(is_encrypted(&report.outputs[0]));
    assert!(report.warnings.iter().any(|w| w.contains("PDF/A was disabled")));
}

#[tokio::test]
async fn test_compression_failure_is_not_fatal() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 3);

    let options = JobOptions {
        compress: Some(CompressionLevel::Balanced),
        ..Default::default()
    };
    let request = JobRequest::merge(vec![a], ws.output_dir()).with_options(options);
    let report = ws
        .pipeline(Arc::new(BrokenRasterizer))
        .run(request, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(page_count(&report.outputs[0]), 3);
    assert!(report.warnings.iter().any(|w| w.contains("Compression failed")));
    assert!(ws.tracker.is_empty());
    assert!(ws.temp_files().is_empty());
}

#[tokio::test]
async fn test_missing_rasterizer_skips_enhancements() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 1);

    let options = JobOptions {
        apply_pdfa: true,
        compress: Some(CompressionLevel::Max),
        ..Default::default()
    };
    let request = JobRequest::merge(vec![a], ws.output_dir()).with_options(options);
    let report = ws
        .pipeline(Arc::new(MissingRasterizer))
        .run(request, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert!(report.warnings.iter().any(|w| w.contains("PDF/A conversion is unavailable")));
    assert!(report.warnings.iter().any(|w| w.contains("Compression is unavailable")));
}

#[tokio::test]
async fn test_enhancements_run_in_order() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 2);
    let rasterizer = Arc::new(CopyingRasterizer::default());
    let (events, mut receiver) = unbounded_channel();

    let options = JobOptions {
        apply_pdfa: true,
        compress: Some(CompressionLevel::Max),
        ..Default::default()
    };
    let request = JobRequest::merge(vec![a], ws.output_dir()).with_options(options);
    let report = ws
        .pipeline(rasterizer.clone())
        .with_events(events)
        .run(request, &CancelToken::new())
        .await
        .unwrap();

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(rasterizer.conversions(), 1);
    assert_eq!(rasterizer.compressions(), 1);

    let mut states = Vec::new();
    let mut finished = None;
    while let Ok(event) = receiver.try_recv() {
        match event {
            PipelineEvent::StateChanged(state) => states.push(state),
            PipelineEvent::Finished(state) => finished = Some(state),
            _ => {}
        }
    }
    assert_eq!(finished, Some(JobState::Done));
    assert_eq!(
        states,
        vec![
            JobState::Admitted,
            JobState::Validating,
            JobState::Merging,
            JobState::ConvertingPdfA,
            JobState::Compressing,
            JobState::FinalValidating,
            JobState::Committing,
        ]
    );
}

#[tokio::test]
async fn test_invalid_final_output_falls_back() {
    let ws = Workspace::new();
    let a = ws.input("a.pdf", 4);

    let options = JobOptions {
        compress: Some(CompressionLevel::Min),
        ..Default::default()
    };
    let request = JobRequest::merge(vec![a], ws.output_dir()).with_options(options);
    let report = ws
        .pipeline(Arc::new(GarbageRasterizer))
        .run(request, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, JobState::Done);
    assert_eq!(page_count(&report.outputs[0]), 4);
    assert!(report.warnings.iter().any(|w| w.contains("failed validation")));
    assert!(ws.temp_files().is_empty());
}
