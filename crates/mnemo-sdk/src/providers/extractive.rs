use std::collections::HashSet;

use async_trait::async_trait;
use mnemo_core::{Result, SummarizationProvider};

/// Sentence-level extractive summarizer.
///
/// Drops repeated texts and sentences, then keeps whole sentences in input
/// order until the next one would exceed `max_len` characters. If the first
/// sentence alone is too long it is cut at a word boundary. The result never
/// exceeds `max_len` characters.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self
    }

    pub fn summarize_texts(&self, texts: &[String], max_len: usize) -> String {
        let mut seen = HashSet::new();
        let mut sentences = Vec::new();
        for text in texts {
            for sentence in split_sentences(text) {
                if seen.insert(sentence.to_lowercase()) {
                    sentences.push(sentence);
                }
            }
        }

        let mut out = String::new();
        let mut len = 0;
        for sentence in sentences {
            let n = sentence.chars().count();
            let sep = usize::from(!out.is_empty());
            if len + sep + n > max_len {
                if out.is_empty() {
                    out = cut_at_word(&sentence, max_len);
                }
                break;
            }
            if sep == 1 {
                out.push(' ');
            }
            out.push_str(&sentence);
            len += sep + n;
        }
        out
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

fn cut_at_word(sentence: &str, max_len: usize) -> String {
    let cut: String = sentence.chars().take(max_len).collect();
    if sentence.chars().count() <= max_len {
        return cut;
    }
    match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => cut[..pos].trim_end().to_string(),
        _ => cut,
    }
}

#[async_trait]
impl SummarizationProvider for ExtractiveSummarizer {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn summarize(&self, texts: &[String], max_len: usize) -> Result<String> {
        Ok(self.summarize_texts(texts, max_len))
    }
}
