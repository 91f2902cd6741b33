//! Static JSON resources served as-is: the trivia question set and the
//! portfolio cards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const TRIVIA_FILE: &str = "QnA.json";
pub const CARDS_FILE: &str = "cards.json";
pub const BUILDS_FILE: &str = "builds.json";

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Unable to open file {name}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to read json data in {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "Question")]
    pub question: String,
    #[serde(rename = "Choices")]
    pub choices: Vec<String>,
    #[serde(rename = "Answer")]
    pub answer: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub img: String,
    pub title: String,
    pub txt: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cards {
    pub proj: Vec<Card>,
    pub exp: Vec<Card>,
}

/// Reads and strictly decodes `<dir>/<name>`.
pub async fn load_json<T: serde::de::DeserializeOwned>(
    dir: &Path,
    name: &str,
) -> Result<T, ResourceError> {
    let bytes = tokio::fs::read(dir.join(name))
        .await
        .map_err(|source| ResourceError::Open {
            name: name.to_string(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| ResourceError::Parse {
        name: name.to_string(),
        source,
    })
}

pub async fn load_trivia(dir: &Path) -> Result<Vec<Question>, ResourceError> {
    load_json(dir, TRIVIA_FILE).await
}

pub async fn load_cards(dir: &Path) -> Result<Cards, ResourceError> {
    load_json(dir, CARDS_FILE).await
}
