use std::time::Duration;

use crate::error::SourceError;

/// Album art can be large; anything past this is not worth drawing.
const MAX_ARTWORK_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct ArtworkFetcher {
    http: reqwest::Client,
}

impl ArtworkFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http })
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        if bytes.len() > MAX_ARTWORK_BYTES {
            return Err(SourceError::Malformed(format!(
                "artwork is {} bytes",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}
