//! TensorFlow frozen-graph backends for the detector and recognizer seams.

use tensorflow::{ Graph, ImportGraphDefOptions, Session, SessionOptions, SessionRunArgs, Tensor };
use image::{ imageops::{ self, FilterType }, GrayImage, RgbImage };
use log::{ debug, info };

use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

use crate::detection::{ Detection, Detector };
use crate::error::{ LprError, LprErrorKind };
use crate::ocr::Recognizer;
use crate::utils;

fn load_graph(pb_file: &Path) -> Result<(Graph, Session), LprError> {
    if !pb_file.exists() {
        return Err(LprErrorKind::MissingModel(pb_file.to_path_buf()).into());
    }
    let mut pb = Vec::new();
    File::open(pb_file)?.read_to_end(&mut pb)?;
    // import graph def
    let mut graph = Graph::new();
    graph.import_graph_def(&pb, &ImportGraphDefOptions::new())?;
    let session = Session::new(&SessionOptions::new(), &graph)?;
    info!("loaded graph {}", pb_file.display());
    Ok((graph, session))
}

/// Object detection graph in the TensorFlow object-detection API layout:
/// a `uint8 [1, h, w, 3]` input, normalized `[ymin, xmin, ymax, xmax]` boxes
/// and one score per box.
pub struct TfDetector {
    graph: Graph,
    session: Session,
    input_name: String,
    box_name: String,
    scores_name: String,
}

impl TfDetector {

    pub fn new(pb_file: impl AsRef<Path>, input_name: &str, box_name: &str, scores_name: &str) -> Result<Self, LprError> {
        let (graph, session) = load_graph(pb_file.as_ref())?;
        Ok(Self {
            graph,
            session,
            input_name: input_name.to_string(),
            box_name: box_name.to_string(),
            scores_name: scores_name.to_string(),
        })
    }

    /// Graph with the default object-detection tensor names.
    pub fn open(pb_file: impl AsRef<Path>) -> Result<Self, LprError> {
        Self::new(pb_file, "image_tensor", "detection_boxes", "detection_scores")
    }

    /// return (boxes, scores)
    fn run(&self, input: &Tensor<u8>) -> Result<(Tensor<f32>, Tensor<f32>), LprError> {
        let graph = &self.graph;
        let mut args = SessionRunArgs::new();
        args.add_feed(&graph.operation_by_name_required(&self.input_name)?, 0, input);
        let box_token = args.request_fetch(&graph.operation_by_name_required(&self.box_name)?, 0);
        let scores_token = args.request_fetch(&graph.operation_by_name_required(&self.scores_name)?, 0);
        self.session.run(&mut args)?;
        let boxes: Tensor<f32> = args.fetch(box_token)?;
        let scores: Tensor<f32> = args.fetch(scores_token)?;
        Ok((boxes, scores))
    }
}

impl Detector for TfDetector {

    fn detect(&self, image: &RgbImage, confidence: f32) -> Result<Vec<Detection>, LprError> {
        let (width, height) = image.dimensions();
        let input = Tensor::new(&[1, height as u64, width as u64, 3]).with_values(image.as_raw())?;
        let (boxes, scores) = self.run(&input)?;

        let detections: Vec<Detection> = boxes.chunks(4).zip(scores.iter())
            .filter(|(_, score)| **score >= confidence)
            .map(|(v, score)| {
                let ymin = (v[0] * height as f32) as i32;
                let xmin = (v[1] * width as f32) as i32;
                let ymax = (v[2] * height as f32) as i32;
                let xmax = (v[3] * width as f32) as i32;
                Detection::new(xmin, ymin, xmax, ymax, score.max(0.0).min(1.0))
            })
            .collect();
        debug!("{}x{}: {} boxes at >= {}", width, height, detections.len(), confidence);
        Ok(detections)
    }
}

/// CRNN style recognition graph: a `float [1, h, w, 3]` input and a
/// `[steps, classes]` score output decoded greedily over `charset`.
pub struct TfRecognizer {
    graph: Graph,
    session: Session,
    input_name: String,
    output_name: String,
    charset: Vec<char>,
    input_width: u32,
    input_height: u32,
    /// the graph reads columns as rows
    transposed: bool,
}

impl TfRecognizer {

    pub fn new(
        pb_file: impl AsRef<Path>,
        input_name: &str,
        output_name: &str,
        charset: &str,
        (input_width, input_height): (u32, u32),
        transposed: bool,
    ) -> Result<Self, LprError> {
        let (graph, session) = load_graph(pb_file.as_ref())?;
        Ok(Self {
            graph,
            session,
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
            charset: charset.chars().collect(),
            input_width,
            input_height,
            transposed,
        })
    }

    fn run(&self, input: &Tensor<f32>) -> Result<Tensor<f32>, LprError> {
        let graph = &self.graph;
        let mut args = SessionRunArgs::new();
        args.add_feed(&graph.operation_by_name_required(&self.input_name)?, 0, input);
        let res = args.request_fetch(&graph.operation_by_name_required(&self.output_name)?, 0);
        self.session.run(&mut args)?;
        let res: Tensor<f32> = args.fetch(res)?;
        Ok(res)
    }
}

impl Recognizer for TfRecognizer {

    fn recognize(&self, image: &GrayImage, allowlist: Option<&str>) -> Result<Vec<String>, LprError> {
        let image = if self.transposed { utils::transpose(image) } else { image.clone() };
        let (w, h) = (self.input_width, self.input_height);
        let resized = imageops::resize(&image, w, h, FilterType::CatmullRom);
        // gray replicated into three channels
        let data: Vec<f32> = resized.as_raw().iter().flat_map(|v| vec![*v as f32; 3]).collect();
        let input = Tensor::new(&[1, h as u64, w as u64, 3]).with_values(&data)?;

        let output = self.run(&input)?;
        let classes = match output.dims().last() {
            Some(&c) if c > 0 => c as usize,
            _ => return Err(LprError::recognition("recognizer output has no class axis")),
        };
        let (text, confidence) = utils::greedy_decode(&output, classes, &self.charset, allowlist);
        debug!("decoded {:?} ({:.3})", text, confidence);
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![text])
    }
}
