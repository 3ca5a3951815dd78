use ctxwin::{
    ExtractionConfig, ForwardPass, LayerStates, Token, TokenizedStory, WindowConfig, extract_story,
};

/// Toy causal "model": position i gets the running mean of token ids up to i.
struct RunningMean;

impl ForwardPass for RunningMean {
    type Error = String;

    fn hidden_size(&self) -> usize {
        1
    }

    fn hidden_states(&self, tokens: &[Token]) -> Result<LayerStates, String> {
        let mut sum = 0.0;
        let layer = tokens
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                sum += t as f32;
                vec![sum / (i + 1) as f32]
            })
            .collect();
        Ok(vec![layer])
    }
}

fn main() -> Result<(), ctxwin::FeatureError> {
    let text = "the quick brown fox jumps over the lazy dog and the quick brown fox sleeps";
    let words: Vec<&str> = text.split_whitespace().collect();
    let tokenizer = |w: &str| -> Vec<Token> { w.bytes().map(|b| b as Token).collect() };
    let story = TokenizedStory::from_words(&words, &tokenizer).named("fox");

    let config = ExtractionConfig {
        window: WindowConfig::new(4, 16)?,
        ..ExtractionConfig::default()
    };

    let out = extract_story(&story, &RunningMean, &config)?;

    println!("{} words, {} tokens", story.word_count(), story.tokens().len());
    println!("{:?}", out.stats);
    for (word, row) in words.iter().zip(out.features.rows()) {
        println!("  {word:<8} {:.2}", row[0]);
    }

    Ok(())
}
