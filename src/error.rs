#[cfg(feature = "tf-models")]
use tensorflow::Status;
use image::ImageError;

use std::error::Error;
use std::fmt;
use std::io::Error as IOError;
use std::path::PathBuf;

#[derive(Debug)]
pub struct LprError(LprErrorKind);

#[derive(Debug)]
pub enum LprErrorKind {
    IOError(IOError),
    ImageError(ImageError),
    #[cfg(feature = "tf-models")]
    TensorflowError(Status),
    /// model artifact path does not exist
    MissingModel(PathBuf),
    /// input image path does not exist
    MissingImage(PathBuf),
    /// input image exists but could not be decoded
    UnreadableImage(PathBuf, ImageError),
    /// image has the wrong channel layout for the operation
    InvalidImage(String),
    InvalidFont(PathBuf),
    /// expanded detection box clamps to zero area
    EmptyCrop { x1: i32, y1: i32, x2: i32, y2: i32 },
    Recognition(String),
    Config(String),
}

impl LprError {
    pub fn kind(&self) -> &LprErrorKind {
        &self.0
    }

    pub fn recognition(msg: impl Into<String>) -> Self {
        Self(LprErrorKind::Recognition(msg.into()))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self(LprErrorKind::Config(msg.into()))
    }

    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self(LprErrorKind::InvalidImage(msg.into()))
    }
}

impl<T> From<T> for LprError
where T: Into<LprErrorKind>
{
    fn from(e: T) -> Self {
        Self(e.into())
    }
}

impl fmt::Display for LprError {

    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            LprErrorKind::IOError(e) => e.fmt(f),
            LprErrorKind::ImageError(e) => e.fmt(f),
            #[cfg(feature = "tf-models")]
            LprErrorKind::TensorflowError(e) => e.fmt(f),
            LprErrorKind::MissingModel(path) => write!(f, "model not found: {}", path.display()),
            LprErrorKind::MissingImage(path) => write!(f, "image not found: {}", path.display()),
            LprErrorKind::UnreadableImage(path, e) => {
                write!(f, "could not read image {}: {}", path.display(), e)
            }
            LprErrorKind::InvalidImage(msg) => write!(f, "invalid image: {}", msg),
            LprErrorKind::InvalidFont(path) => write!(f, "invalid font file: {}", path.display()),
            LprErrorKind::EmptyCrop { x1, y1, x2, y2 } => {
                write!(f, "crop ({}, {}, {}, {}) has zero area", x1, y1, x2, y2)
            }
            LprErrorKind::Recognition(msg) => write!(f, "recognition failed: {}", msg),
            LprErrorKind::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl Error for LprError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.kind() {
            LprErrorKind::IOError(e) => Some(e),
            LprErrorKind::ImageError(e) => Some(e),
            LprErrorKind::UnreadableImage(_, e) => Some(e),
            #[cfg(feature = "tf-models")]
            LprErrorKind::TensorflowError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IOError> for LprErrorKind {
    fn from(e: IOError) -> Self {
        Self::IOError(e)
    }
}

impl From<ImageError> for LprErrorKind {
    fn from(e: ImageError) -> Self {
        Self::ImageError(e)
    }
}

#[cfg(feature = "tf-models")]
impl From<Status> for LprErrorKind {
    fn from(e: Status) -> Self {
        Self::TensorflowError(e)
    }
}
