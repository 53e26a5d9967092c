// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// tests/pipeline.rs - 检测流水线集成测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aerotool::{
  DetectionStatus, Detector, InferenceParams, PipelineError, SharedDetector,
  frame::RgbNchwFrame,
  model::{ClassCatalog, Model},
  output::{ProcessedRecord, Render, draw::Draw},
  pipeline::Stage,
  task::{ContinuousTask, JobOutcome, RecordJob, Task, process_record},
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array3, ArrayD};

/// 返回固定输出的模型，并记录收到的输入形状
struct FakeModel {
  output: ArrayD<f32>,
  seen_shape: Mutex<Option<Vec<usize>>>,
}

impl FakeModel {
  fn new(output: ArrayD<f32>) -> Self {
    FakeModel {
      output,
      seen_shape: Mutex::new(None),
    }
  }

  /// (1, 15, 8400) 输出，只有第一个框有分数
  fn single_box(cx: f32, cy: f32, w: f32, h: f32, class_id: usize, score: f32) -> Self {
    let mut raw = Array3::<f32>::zeros((1, 15, 8400));
    raw[[0, 0, 0]] = cx;
    raw[[0, 1, 0]] = cy;
    raw[[0, 2, 0]] = w;
    raw[[0, 3, 0]] = h;
    raw[[0, 4 + class_id, 0]] = score;
    FakeModel::new(raw.into_dyn())
  }
}

impl Model for FakeModel {
  type Error = std::io::Error;

  fn infer(&self, input: &RgbNchwFrame) -> Result<ArrayD<f32>, Self::Error> {
    *self.seen_shape.lock().unwrap() = Some(input.view().shape().to_vec());
    Ok(self.output.clone())
  }
}

struct FailingModel;

impl Model for FailingModel {
  type Error = std::io::Error;

  fn infer(&self, _input: &RgbNchwFrame) -> Result<ArrayD<f32>, Self::Error> {
    Err(std::io::Error::other("runtime unavailable"))
  }
}

#[derive(Default)]
struct Collect {
  records: Mutex<Vec<ProcessedRecord>>,
}

impl Render<ProcessedRecord> for &Collect {
  type Error = std::convert::Infallible;

  fn render_result(&self, result: &ProcessedRecord) -> Result<(), Self::Error> {
    self.records.lock().unwrap().push(result.clone());
    Ok(())
  }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_pixel(width, height, Rgb([90, 120, 150]));
  let mut bytes = Vec::new();
  DynamicImage::ImageRgb8(image)
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

fn detector<M: Model>(model: M) -> Detector<M> {
  Detector::new(model).with_draw(Draw::without_font())
}

#[test]
fn landscape_photo_maps_back_to_original_pixels() {
  let model = Arc::new(FakeModel::single_box(320.0, 320.0, 100.0, 100.0, 1, 0.9));
  let detector = detector(model.clone());

  let output = detector.detect(&png_bytes(1280, 720)).unwrap();

  assert_eq!(
    model.seen_shape.lock().unwrap().as_deref(),
    Some(&[1, 3, 640, 640][..])
  );
  assert_eq!(output.report.status, DetectionStatus::Processed);
  assert_eq!(output.report.detections.len(), 1);
  let detection = &output.report.detections[0];
  assert_eq!(detection.class_label, "2_screwdriver_plus");
  assert_eq!(detection.confidence, 0.9);
  assert_eq!(detection.bbox, [540, 260, 740, 460]);

  assert_eq!(&output.annotated_image[..2], &[0xFF, 0xD8]);
  let annotated = image::load_from_memory(&output.annotated_image).unwrap();
  assert_eq!((annotated.width(), annotated.height()), (1280, 720));
}

#[test]
fn empty_model_output_is_no_detections() {
  let model = FakeModel::new(ArrayD::zeros(ndarray::IxDyn(&[1, 15, 0])));
  let output = detector(model).detect(&png_bytes(64, 48)).unwrap();
  assert_eq!(output.report.status, DetectionStatus::NoDetections);
  assert!(output.report.detections.is_empty());
  assert!(!output.annotated_image.is_empty());
}

#[test]
fn malformed_bytes_fail_in_preprocessing() {
  let detector = detector(FakeModel::single_box(320.0, 320.0, 100.0, 100.0, 1, 0.9));
  let err = detector.detect(b"definitely not an image").unwrap_err();
  assert!(matches!(err, PipelineError::ImageDecode(_)));
  assert_eq!(err.stage(), Stage::Preprocessing);

  let (report, annotated) = detector.detect_or_report(b"", &InferenceParams::default());
  assert_eq!(report.status, DetectionStatus::Error);
  assert!(report.reason.is_some());
  assert!(annotated.is_none());
}

#[test]
fn invalid_thresholds_are_rejected() {
  let detector = detector(FakeModel::single_box(320.0, 320.0, 100.0, 100.0, 1, 0.9));
  let params = InferenceParams {
    iou: 1.5,
    ..Default::default()
  };
  let err = detector.detect_with(&png_bytes(32, 32), &params).unwrap_err();
  assert!(matches!(err, PipelineError::InvalidInput(_)));
  assert_eq!(err.kind(), "invalid_input");
}

#[test]
fn model_failure_reports_inference_stage() {
  let err = detector(FailingModel).detect(&png_bytes(32, 32)).unwrap_err();
  assert!(matches!(err, PipelineError::Inference(_)));
  assert_eq!(err.stage(), Stage::ModelExecuting);
  assert!(err.to_string().contains("runtime unavailable"));
}

#[test]
fn shared_detector_initializes_once() {
  static SHARED: SharedDetector<FakeModel> = SharedDetector::new();
  let calls = AtomicUsize::new(0);

  std::thread::scope(|scope| {
    for _ in 0..8 {
      scope.spawn(|| {
        let detector = SHARED
          .get_or_try_init(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PipelineError>(detector(FakeModel::single_box(
              320.0, 320.0, 100.0, 100.0, 1, 0.9,
            )))
          })
          .unwrap();
        assert_eq!(detector.catalog().len(), 11);
      });
    }
  });

  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert!(SHARED.get().is_some());
}

#[test]
fn concurrent_detections_share_one_model() {
  let model = Arc::new(FakeModel::single_box(320.0, 320.0, 100.0, 100.0, 1, 0.9));
  let catalog = Arc::new(ClassCatalog::tools());
  let bytes = png_bytes(1280, 720);
  let image = RgbImage::from_pixel(1280, 720, Rgb([90, 120, 150]));

  let bboxes: Vec<[i32; 4]> = std::thread::scope(|scope| {
    let handles: Vec<_> = (0..4)
      .map(|i| {
        let detector = Detector::from_shared(model.clone(), catalog.clone())
          .with_draw(Draw::without_font());
        let (bytes, image) = (&bytes, &image);
        scope.spawn(move || {
          let output = if i % 2 == 0 {
            detector.detect(bytes).unwrap()
          } else {
            detector.detect_image(image, &detector.params()).unwrap()
          };
          assert_eq!(output.report.detections.len(), 1);
          output.report.detections[0].bbox
        })
      })
      .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert_eq!(bboxes, vec![[540, 260, 740, 460]; 4]);
  assert_eq!(catalog.label(1), "2_screwdriver_plus");
}

#[test]
fn job_confidence_overrides_default() {
  let detector = detector(FakeModel::single_box(320.0, 320.0, 100.0, 100.0, 4, 0.5));
  let collect = Collect::default();

  // 默认 0.7 的任务阈值会过滤掉 0.5 的框
  let outcome = process_record(&detector, RecordJob::new(1, png_bytes(640, 640)), &&collect);
  assert_eq!(outcome, JobOutcome::Success { record_id: 1 });

  let job = RecordJob::new(2, png_bytes(640, 640))
    .with_expected_confidence(Some(0.4))
    .with_expected_object_count(Some(3))
    .with_note("bench 2");
  let outcome = process_record(&detector, job, &&collect);
  assert_eq!(outcome, JobOutcome::Success { record_id: 2 });

  let records = collect.records.lock().unwrap();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0].report.status, DetectionStatus::NoDetections);
  assert_eq!(records[1].report.detections.len(), 1);
  assert_eq!(records[1].report.detections[0].class_label, "5_locking_pliers");
  assert_eq!(records[1].note, "bench 2");
}

#[test]
fn failed_job_stores_error_state() {
  let detector = detector(FakeModel::single_box(320.0, 320.0, 100.0, 100.0, 1, 0.9));
  let collect = Collect::default();
  let outcome = process_record(
    &detector,
    RecordJob::new(9, b"garbage".to_vec()).with_note("bench 3"),
    &&collect,
  );
  match outcome {
    JobOutcome::Error { record_id, error } => {
      assert_eq!(record_id, 9);
      assert!(!error.is_empty());
    }
    other => panic!("unexpected outcome {:?}", other),
  }

  let records = collect.records.lock().unwrap();
  assert_eq!(records.len(), 1);
  let record = &records[0];
  assert_eq!(record.record_id, 9);
  assert_eq!(record.note, "bench 3");
  assert_eq!(record.report.status, DetectionStatus::Error);
  assert!(record.report.detections.is_empty());
  assert!(record.report.reason.is_some());
  assert!(record.annotated_image.is_none());
}

#[test]
fn continuous_task_drains_queue() {
  let detector = detector(FakeModel::single_box(320.0, 320.0, 100.0, 100.0, 1, 0.9));
  let collect = Collect::default();
  let jobs = vec![
    RecordJob::new(1, png_bytes(64, 64)),
    RecordJob::new(2, b"broken".to_vec()),
    RecordJob::new(3, png_bytes(64, 32)),
  ];

  let report = ContinuousTask::default()
    .with_interrupt(false)
    .run_task(jobs.clone().into_iter(), &detector, &collect)
    .unwrap();
  assert_eq!(report.outcomes.len(), 3);
  assert_eq!(report.succeeded(), 2);
  assert_eq!(report.failed(), 1);
  // 失败的记录也会保存错误状态
  assert_eq!(collect.records.lock().unwrap().len(), 3);

  let limited = ContinuousTask::default()
    .with_interrupt(false)
    .with_max_jobs(Some(1))
    .run_task(jobs.into_iter(), &detector, &collect)
    .unwrap();
  assert_eq!(limited.outcomes.len(), 1);
}

#[cfg(feature = "directory_record")]
#[test]
fn records_are_archived_on_disk() {
  use aerotool::output::DirectoryRecordOutput;

  let dir = tempfile::tempdir().unwrap();
  let output = DirectoryRecordOutput::new(dir.path());
  let detector = detector(FakeModel::single_box(320.0, 320.0, 100.0, 100.0, 1, 0.9));

  let job = RecordJob::new(5, png_bytes(1280, 720)).with_note("found near wing");
  assert!(process_record(&detector, job, &output).is_success());

  let files: Vec<_> = walk(dir.path());
  let note = files
    .iter()
    .find(|p| p.extension().is_some_and(|e| e == "txt"))
    .map(|p| std::fs::read_to_string(p).unwrap())
    .unwrap();
  assert!(note.starts_with("found near wing\n\n"));
  assert!(note.contains("1. 2_screwdriver_plus (confidence: 0.90)"));
  assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "jpg")));
  assert!(files.iter().any(|p| p.extension().is_some_and(|e| e == "json")));
}

#[cfg(feature = "directory_record")]
#[test]
fn failed_record_is_archived_without_image() {
  use aerotool::output::DirectoryRecordOutput;

  let dir = tempfile::tempdir().unwrap();
  let output = DirectoryRecordOutput::new(dir.path());
  let detector = detector(FailingModel);

  let outcome = process_record(&detector, RecordJob::new(6, png_bytes(64, 64)), &output);
  assert!(!outcome.is_success());

  let files = walk(dir.path());
  assert!(!files.iter().any(|p| p.extension().is_some_and(|e| e == "jpg")));
  let report: serde_json::Value = files
    .iter()
    .find(|p| p.extension().is_some_and(|e| e == "json"))
    .map(|p| serde_json::from_slice(&std::fs::read(p).unwrap()).unwrap())
    .unwrap();
  assert_eq!(report["status"], "error");
  assert!(report["reason"].as_str().is_some_and(|r| r.contains("runtime unavailable")));
  assert_eq!(report["detections"], serde_json::json!([]));
}

#[cfg(feature = "directory_record")]
fn walk(root: &std::path::Path) -> Vec<std::path::PathBuf> {
  let mut files = Vec::new();
  for entry in std::fs::read_dir(root).unwrap() {
    let path = entry.unwrap().path();
    if path.is_dir() {
      files.extend(walk(&path));
    } else {
      files.push(path);
    }
  }
  files
}
