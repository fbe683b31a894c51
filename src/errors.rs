use thiserror::Error;

#[derive(Error, Debug)]
pub enum BooruErrors {
    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Image processing failure: {0}")]
    Image(String),

    #[error("Database failure: {0}")]
    Db(String),

    #[error("Malformed JSON: {0}")]
    Json(String),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Failure parsing path: {0}")]
    PathParsing(String),
}

impl From<rusqlite::Error> for BooruErrors {
    fn from(e: rusqlite::Error) -> Self {
        BooruErrors::Db(e.to_string())
    }
}

impl From<std::io::Error> for BooruErrors {
    fn from(e: std::io::Error) -> Self {
        BooruErrors::Io(e.to_string())
    }
}

impl From<image::ImageError> for BooruErrors {
    fn from(e: image::ImageError) -> Self {
        BooruErrors::Image(e.to_string())
    }
}

impl From<serde_yaml::Error> for BooruErrors {
    fn from(e: serde_yaml::Error) -> Self {
        BooruErrors::Settings(e.to_string())
    }
}
