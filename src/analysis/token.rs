use serde::{Serialize, Deserialize};

/// Prefix of a stem companion term in the term dictionary.
pub const STEM_PREFIX: char = '+';
/// Prefix of a phonetic companion term in the term dictionary.
pub const PHONETIC_PREFIX: char = '<';

/// Token representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,      // Term as stored in the dictionary
    pub position: u32,     // Position in document (for phrase queries)
    pub offset: usize,     // Byte offset in original text
    pub length: usize,     // Surface length in bytes
    pub kind: TokenKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Word,
    Stem,      // Companion emitted next to its surface word
    Phonetic,  // Companion emitted for PHONETIC fields
}

impl Token {
    pub fn new(text: String, position: u32, offset: usize) -> Self {
        let length = text.len();
        Token {
            text,
            position,
            offset,
            length,
            kind: TokenKind::Word,
        }
    }

    /// A companion term sharing the surface token's position and span.
    pub fn companion(&self, text: String, kind: TokenKind) -> Self {
        Token {
            text,
            position: self.position,
            offset: self.offset,
            length: self.length,
            kind,
        }
    }
}
