use crate::error::EmbedderError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Turns texts into fixed-length vectors, one per input and in input order.
/// Blank inputs must come back as a zero vector rather than failing the batch.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;
}

/// Offline embedder hashing character trigrams into buckets. Deterministic,
/// which makes it the embedder of choice for tests and air-gapped runs.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        if text.trim().is_empty() {
            return vector;
        }

        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

/// Client for a hosted embedding service.
///
/// Sends `{"texts": [...]}` and expects `{"embeddings": [[...], ...]}` back.
/// Blank inputs are never sent; they are answered locally with zero vectors.
pub struct HttpEmbedder {
    endpoint: String,
    client: Client,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: Client::new(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let pending: Vec<&str> = texts
            .iter()
            .map(String::as_str)
            .filter(|text| !text.trim().is_empty())
            .collect();

        if pending.is_empty() {
            return Ok(vec![vec![0f32; self.dimensions]; texts.len()]);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "texts": pending }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbedderError::BackendResponse {
                backend: self.endpoint.clone(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let embedded = parse_embeddings(&parsed, pending.len(), self.dimensions)?;
        Ok(fill_blank_slots(texts, embedded, self.dimensions))
    }
}

fn parse_embeddings(
    body: &Value,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let rows = body
        .pointer("/embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbedderError::Request("response has no embeddings array".to_string()))?;

    if rows.len() != expected {
        return Err(EmbedderError::CountMismatch {
            expected,
            actual: rows.len(),
        });
    }

    rows.iter()
        .enumerate()
        .map(|(position, row)| {
            let values = row
                .as_array()
                .ok_or_else(|| {
                    EmbedderError::Request(format!("embedding {position} is not an array"))
                })?
                .iter()
                .map(|value| value.as_f64().map(|number| number as f32))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(|| {
                    EmbedderError::Request(format!("embedding {position} has non-numeric values"))
                })?;

            if values.len() != dimensions {
                return Err(EmbedderError::Request(format!(
                    "embedding {position} has dimension {} instead of {dimensions}",
                    values.len()
                )));
            }
            Ok(values)
        })
        .collect()
}

fn fill_blank_slots(texts: &[String], embedded: Vec<Vec<f32>>, dimensions: usize) -> Vec<Vec<f32>> {
    let mut embedded = embedded.into_iter();
    texts
        .iter()
        .map(|text| {
            if text.trim().is_empty() {
                vec![0f32; dimensions]
            } else {
                embedded.next().unwrap_or_else(|| vec![0f32; dimensions])
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow");
        let second = embedder.embed("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn blank_inputs_embed_to_zero_vectors() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let vectors = embedder
            .embed_batch(&["   ".to_string(), String::new(), "valve seat".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 3);
        assert!(vectors[0].iter().all(|value| *value == 0.0));
        assert!(vectors[1].iter().all(|value| *value == 0.0));
        assert!(vectors[2].iter().any(|value| *value != 0.0));
    }

    #[test]
    fn service_response_is_parsed_and_validated() {
        let body = json!({ "embeddings": [[0.5, 1.0], [0.0, -2.0]] });
        let parsed = parse_embeddings(&body, 2, 2).unwrap();
        assert_eq!(parsed, vec![vec![0.5, 1.0], vec![0.0, -2.0]]);

        assert!(matches!(
            parse_embeddings(&body, 3, 2),
            Err(EmbedderError::CountMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(parse_embeddings(&body, 2, 3).is_err());
        assert!(parse_embeddings(&json!({ "data": [] }), 0, 2).is_err());
    }

    #[test]
    fn blank_slots_keep_input_order() {
        let texts = vec!["a".to_string(), " ".to_string(), "b".to_string()];
        let filled = fill_blank_slots(&texts, vec![vec![1.0], vec![2.0]], 1);
        assert_eq!(filled, vec![vec![1.0], vec![0.0], vec![2.0]]);
    }
}
