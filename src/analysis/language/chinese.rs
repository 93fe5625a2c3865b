use std::collections::HashMap;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::Tokenizer;

/// Folds one script variant onto another before segmentation.
pub trait ScriptFolder: Send + Sync {
    fn fold(&self, c: char) -> char;
}

/// Traditional to simplified folding from a lookup table. The built-in table
/// covers frequent characters only; callers with an authoritative table
/// install it with `TableFolder::from_pairs`.
pub struct TableFolder {
    table: HashMap<char, char>,
}

const COMMON_TRADITIONAL: &[(char, char)] = &[
    ('國', '国'), ('華', '华'), ('學', '学'), ('東', '东'), ('電', '电'),
    ('語', '语'), ('說', '说'), ('話', '话'), ('們', '们'), ('會', '会'),
    ('時', '时'), ('個', '个'), ('來', '来'), ('對', '对'), ('開', '开'),
    ('關', '关'), ('門', '门'), ('問', '问'), ('間', '间'), ('體', '体'),
    ('萬', '万'), ('與', '与'), ('書', '书'), ('車', '车'), ('馬', '马'),
    ('長', '长'), ('後', '后'), ('發', '发'), ('經', '经'), ('見', '见'),
    ('網', '网'), ('機', '机'), ('愛', '爱'), ('點', '点'), ('號', '号'),
    ('區', '区'), ('廣', '广'), ('龍', '龙'), ('魚', '鱼'), ('鳥', '鸟'),
    ('實', '实'), ('現', '现'), ('頭', '头'), ('買', '买'), ('賣', '卖'),
    ('讀', '读'), ('寫', '写'), ('飛', '飞'), ('氣', '气'), ('歡', '欢'),
];

impl TableFolder {
    pub fn from_pairs(pairs: &[(char, char)]) -> Self {
        TableFolder { table: pairs.iter().copied().collect() }
    }
}

impl Default for TableFolder {
    fn default() -> Self {
        TableFolder::from_pairs(COMMON_TRADITIONAL)
    }
}

impl ScriptFolder for TableFolder {
    fn fold(&self, c: char) -> char {
        self.table.get(&c).copied().unwrap_or(c)
    }
}

pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF      // CJK unified ideographs
        | 0x3400..=0x4DBF    // extension A
        | 0x20000..=0x2A6DF  // extension B
        | 0xF900..=0xFAFF    // compatibility ideographs
        | 0x3040..=0x30FF    // hiragana, katakana
    )
}

/// Segments CJK runs into overlapping bigrams (a lone character becomes a
/// unigram); other words go through unchanged and lowercased.
#[derive(Clone)]
pub struct CjkSegmenter {
    pub folder: Arc<dyn ScriptFolder>,
}

impl Default for CjkSegmenter {
    fn default() -> Self {
        CjkSegmenter { folder: Arc::new(TableFolder::default()) }
    }
}

impl CjkSegmenter {
    pub fn new(folder: Arc<dyn ScriptFolder>) -> Self {
        CjkSegmenter { folder }
    }

    fn flush_word(&self, word: &mut String, start: usize, position: &mut u32, tokens: &mut Vec<Token>) {
        if word.is_empty() {
            return;
        }
        let mut t = Token::new(word.to_lowercase(), *position, start);
        t.length = word.len();
        tokens.push(t);
        *position += 1;
        word.clear();
    }

    fn push_run(&self, run: &[(usize, char)], position: &mut u32, tokens: &mut Vec<Token>) {
        if run.len() == 1 {
            let (off, c) = run[0];
            let mut t = Token::new(c.to_string(), *position, off);
            t.length = c.len_utf8();
            tokens.push(t);
            *position += 1;
            return;
        }
        for pair in run.windows(2) {
            let (off, a) = pair[0];
            let (off_b, b) = pair[1];
            let mut t = Token::new([a, b].iter().collect(), *position, off);
            t.length = off_b + b.len_utf8() - off;
            tokens.push(t);
            *position += 1;
        }
    }
}

impl Tokenizer for CjkSegmenter {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        let mut run: Vec<(usize, char)> = Vec::new();
        let mut word = String::new();
        let mut word_start = 0usize;

        // Grapheme clusters keep combining marks attached to their base letter
        for (offset, grapheme) in text.grapheme_indices(true) {
            let first = grapheme.chars().next().unwrap_or(' ');
            if is_cjk(first) {
                self.flush_word(&mut word, word_start, &mut position, &mut tokens);
                run.push((offset, self.folder.fold(first)));
            } else if first.is_alphanumeric() {
                if !run.is_empty() {
                    self.push_run(&run, &mut position, &mut tokens);
                    run.clear();
                }
                if word.is_empty() {
                    word_start = offset;
                }
                word.push_str(grapheme);
            } else {
                if !run.is_empty() {
                    self.push_run(&run, &mut position, &mut tokens);
                    run.clear();
                }
                self.flush_word(&mut word, word_start, &mut position, &mut tokens);
            }
        }
        if !run.is_empty() {
            self.push_run(&run, &mut position, &mut tokens);
        }
        self.flush_word(&mut word, word_start, &mut position, &mut tokens);
        tokens
    }

    fn name(&self) -> &str {
        "cjk"
    }

    fn clone_box(&self) -> Box<dyn Tokenizer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(text: &str) -> Vec<String> {
        CjkSegmenter::default().tokenize(text).into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_bigrams() {
        assert_eq!(texts("中华人民"), vec!["中华", "华人", "人民"]);
    }

    #[test]
    fn test_traditional_folds_to_simplified() {
        assert_eq!(texts("中華"), texts("中华"));
    }

    #[test]
    fn test_mixed_script() {
        let out = texts("Hello 世界");
        assert_eq!(out, vec!["hello", "世界"]);
    }

    #[test]
    fn test_single_character_run() {
        assert_eq!(texts("书"), vec!["书"]);
    }
}
