//! Vocabulary: name -> word lookup
//!
//! Two process-wide scopes: a core vocabulary of built-in words, built
//! once on first use, and a user vocabulary that `DEFINE` (and any named
//! compilation) appends to. Names are case-folded to upper. Entries are
//! never removed, so a looked-up [`Word`] stays valid for the life of the
//! process. Hosts that compile from multiple threads must serialize
//! compilation; lookups may race freely.

use crate::word::{CompiledWord, Word};
use crate::words;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

/// A registry of words by (upper-cased) name.
pub struct Vocabulary {
    entries: RwLock<HashMap<String, Word>>,
}

impl Vocabulary {
    fn new() -> Vocabulary {
        Vocabulary {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a word under its own name. Unnamed words are ignored.
    pub fn add(&self, word: Word) {
        if let Some(name) = word.name() {
            let key = name.to_uppercase();
            self.entries.write().expect("vocabulary poisoned").insert(key, word);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Word> {
        let key = name.to_uppercase();
        self.entries
            .read()
            .expect("vocabulary poisoned")
            .get(&key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("vocabulary poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered names, unsorted.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("vocabulary poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

static CORE: LazyLock<Vocabulary> = LazyLock::new(|| {
    let vocab = Vocabulary::new();
    for def in words::all_words() {
        vocab.add(Word::Native(def));
    }
    vocab
});

static USER: LazyLock<Vocabulary> = LazyLock::new(Vocabulary::new);

/// The vocabulary of built-in words.
pub fn core() -> &'static Vocabulary {
    LazyLock::force(&CORE)
}

/// The vocabulary `DEFINE` adds to.
pub fn user() -> &'static Vocabulary {
    LazyLock::force(&USER)
}

/// Looks a word up in the user vocabulary, then the core one.
pub fn lookup(name: &str) -> Option<Word> {
    user().lookup(name).or_else(|| core().lookup(name))
}

/// Installs a compiled word in the user vocabulary under its own name.
pub fn define(word: Arc<CompiledWord>) {
    user().add(Word::Compiled(word));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_has_builtins() {
        assert!(core().lookup("DUP").is_some());
        assert!(core().lookup("dup").is_some());
        assert!(core().lookup("+").is_some());
        assert!(core().lookup("0=").is_some());
        assert!(core().lookup("_BRANCH").is_some());
        assert!(core().lookup("NO-SUCH-WORD").is_none());
    }

    #[test]
    fn lookup_prefers_user_scope() {
        use crate::effect::StackEffect;
        use crate::instruction::{Instruction, Opcode};
        use crate::word::Flags;

        let w = Arc::new(CompiledWord::new(
            Some("vocab-test-word".into()),
            StackEffect::default(),
            Flags::NONE,
            vec![Instruction::new(Opcode::Return)],
        ));
        define(w.clone());
        let found = lookup("VOCAB-TEST-WORD").expect("defined word");
        assert_eq!(found.as_compiled().map(|a| Arc::as_ptr(a)), Some(Arc::as_ptr(&w)));
    }
}
