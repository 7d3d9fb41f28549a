use crate::error::RetrievalError;
use crate::models::{Chunk, ChunkStats, IngestionOptions};
use regex::Regex;

const SENTENCE_BOUNDARY: &str = r"[.!?]\s+";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, RetrievalError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.chunk_size == 0 {
            return Err(RetrievalError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(RetrievalError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.overlap,
        }
    }
}

/// Drops control characters, collapses whitespace runs to one space and trims.
pub fn normalize_text(text: &str) -> String {
    let without_controls: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();

    without_controls
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sentence-aligned chunker. Sizes are measured in characters.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    boundary: Regex,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, RetrievalError> {
        config.validate()?;
        Ok(Self {
            config,
            boundary: Regex::new(SENTENCE_BOUNDARY)?,
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn chunk(&self, text: &str, document_id: &str) -> Vec<Chunk> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let sentences = self.split_sentences(&normalized);
        self.pack_sentences(&sentences)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk::new(document_id, index, text))
            .collect()
    }

    /// Splits after `.`, `!` or `?` when followed by whitespace.
    pub fn split_sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for boundary in self.boundary.find_iter(text) {
            // The punctuation is a single ASCII byte, so +1 stays on a char boundary.
            sentences.push(&text[start..boundary.start() + 1]);
            start = boundary.end();
        }
        sentences.push(&text[start..]);

        sentences
            .into_iter()
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .collect()
    }

    fn pack_sentences(&self, sentences: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_size = 0usize;

        for &sentence in sentences {
            let sentence_size = char_len(sentence);

            if current_size + sentence_size > self.config.chunk_size && !current.is_empty() {
                let closed = current.join(" ");
                let closed_size = char_len(&closed);
                chunks.push(closed);
                (current, current_size) = overlap_seed(&current, closed_size, self.config.overlap);
            }

            current.push(sentence);
            current_size += sentence_size;
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }

        chunks
    }
}

/// Trailing sentences of a closed chunk whose summed length stays within
/// `overlap`. A chunk that is itself no longer than `overlap` seeds nothing.
fn overlap_seed<'a>(closed: &[&'a str], closed_size: usize, overlap: usize) -> (Vec<&'a str>, usize) {
    if closed_size <= overlap {
        return (Vec::new(), 0);
    }

    let mut seed_size = 0;
    let mut seed_start = closed.len();
    for (position, sentence) in closed.iter().enumerate().rev() {
        let size = char_len(sentence);
        if seed_size + size > overlap {
            break;
        }
        seed_size += size;
        seed_start = position;
    }

    (closed[seed_start..].to_vec(), seed_size)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn chunk_text(
    text: &str,
    document_id: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, RetrievalError> {
    Ok(Chunker::new(config)?.chunk(text, document_id))
}

pub fn chunk_stats(chunks: &[Chunk]) -> ChunkStats {
    if chunks.is_empty() {
        return ChunkStats::default();
    }

    let total_characters: usize = chunks.iter().map(|chunk| chunk.char_count).sum();
    let total_words: usize = chunks.iter().map(|chunk| chunk.word_count).sum();

    ChunkStats {
        total_chunks: chunks.len(),
        avg_chunk_size: total_characters / chunks.len(),
        min_chunk_size: chunks.iter().map(|chunk| chunk.char_count).min().unwrap_or(0),
        max_chunk_size: chunks.iter().map(|chunk| chunk.char_count).max().unwrap_or(0),
        total_characters,
        avg_words_per_chunk: total_words / chunks.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkingConfig::new(chunk_size, overlap).unwrap()).unwrap()
    }

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|chunk| chunk.text.as_str()).collect()
    }

    fn sentence(number: usize, len: usize) -> String {
        let mut sentence = format!("Clause {number:02} ");
        while sentence.len() < len - 1 {
            sentence.push('a');
        }
        sentence.push('.');
        sentence
    }

    #[test]
    fn whitespace_and_controls_are_normalized() {
        let input = "  Line one.\n\n\tLine\u{0007} two!  \u{0000}";
        assert_eq!(normalize_text(input), "Line one. Line two!");
    }

    #[test]
    fn blank_input_yields_no_chunks() {
        assert!(chunker(100, 10).chunk(" \n\t \u{0001} ", "doc-1").is_empty());
        assert!(chunker(100, 10).chunk("", "doc-1").is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            ChunkingConfig::new(0, 0),
            Err(RetrievalError::InvalidChunkConfig(_))
        ));
        assert!(matches!(
            ChunkingConfig::new(100, 100),
            Err(RetrievalError::InvalidChunkConfig(_))
        ));
        let unchecked = ChunkingConfig {
            chunk_size: 10,
            overlap: 40,
        };
        assert!(chunk_text("Some text.", "doc-1", unchecked).is_err());
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let chunker = chunker(100, 10);
        let sentences = chunker.split_sentences("Really?! Yes. Version 1.2 ships now. no end");
        assert_eq!(
            sentences,
            vec!["Really?!", "Yes.", "Version 1.2 ships now.", "no end"]
        );
        assert_eq!(chunker.split_sentences("no boundary at all"), vec!["no boundary at all"]);
    }

    #[test]
    fn trailing_sentences_seed_the_next_chunk() {
        let chunks = chunker(30, 12).chunk("Alpha one. Beta two. Gamma three. Delta four.", "doc-1");
        assert_eq!(
            texts(&chunks),
            vec![
                "Alpha one. Beta two.",
                "Beta two. Gamma three.",
                "Gamma three. Delta four."
            ]
        );
        assert_eq!(
            chunks.iter().map(|chunk| chunk.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(chunks.iter().all(|chunk| chunk.document_id == "doc-1"));
    }

    #[test]
    fn zero_overlap_starts_each_chunk_empty() {
        let chunks = chunker(30, 0).chunk("Alpha one. Beta two. Gamma three. Delta four.", "doc-1");
        assert_eq!(
            texts(&chunks),
            vec!["Alpha one. Beta two.", "Gamma three. Delta four."]
        );
    }

    #[test]
    fn chunk_within_overlap_does_not_seed() {
        let chunks = chunker(10, 9).chunk("Hi there. Bye.", "doc-1");
        assert_eq!(texts(&chunks), vec!["Hi there.", "Bye."]);
    }

    #[test]
    fn oversized_sentence_is_kept_whole() {
        let long = "This sentence is definitely longer than twenty characters.";
        let text = format!("Short one. {long} End.");
        let chunks = chunker(20, 5).chunk(&text, "doc-1");
        assert_eq!(texts(&chunks), vec!["Short one.", long, "End."]);
    }

    #[test]
    fn repeated_sentences_are_not_deduplicated() {
        let chunks = chunker(100, 10).chunk("Same line. Same line. Same line.", "doc-1");
        assert_eq!(texts(&chunks), vec!["Same line. Same line. Same line."]);
        assert_eq!(chunks[0].word_count, 6);
    }

    #[test]
    fn chunking_is_idempotent() {
        let text = (0..20)
            .map(|number| sentence(number, 60 + number * 7))
            .collect::<Vec<_>>()
            .join(" ");
        let chunker = chunker(300, 80);
        assert_eq!(chunker.chunk(&text, "doc-1"), chunker.chunk(&text, "doc-1"));
    }

    #[test]
    fn default_sized_chunks_stay_bounded_and_overlap() {
        let sentences = (0..20)
            .map(|number| sentence(number, if number % 2 == 0 { 168 } else { 80 }))
            .collect::<Vec<_>>();
        let text = sentences.join(" ");
        assert!((2_450..=2_550).contains(&text.chars().count()));

        let options = IngestionOptions::default();
        let chunks = chunk_text(&text, "doc-1", ChunkingConfig::from(&options)).unwrap();
        assert!(chunks.len() >= 2);

        let longest_sentence = sentences.iter().map(|s| s.len()).max().unwrap();
        assert!(chunks
            .iter()
            .all(|chunk| chunk.char_count <= options.chunk_size + longest_sentence));

        let mut eligible_pairs = 0;
        for pair in chunks.windows(2) {
            let last_sentence = sentences
                .iter()
                .rev()
                .find(|sentence| pair[0].text.ends_with(sentence.as_str()))
                .unwrap();
            if last_sentence.len() <= options.overlap {
                eligible_pairs += 1;
                assert!(pair[1].text.starts_with(last_sentence.as_str()));
            }
        }
        assert!(eligible_pairs >= 1);
    }

    #[test]
    fn stats_summarize_chunk_sizes() {
        let chunks = vec![
            Chunk::new("doc-1", 0, "one two three"),
            Chunk::new("doc-1", 1, "four"),
        ];
        let stats = chunk_stats(&chunks);
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_characters, 17);
        assert_eq!(stats.avg_chunk_size, 8);
        assert_eq!(stats.min_chunk_size, 4);
        assert_eq!(stats.max_chunk_size, 13);
        assert_eq!(stats.avg_words_per_chunk, 2);
        assert_eq!(chunk_stats(&[]), ChunkStats::default());
    }
}
