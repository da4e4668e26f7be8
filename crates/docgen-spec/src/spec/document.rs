use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::expr::Expr;

/// Parsed output document. The payload is attached once, after construction.
#[derive(Serialize)]
pub struct Document {
    pub name: String,
    pub out_file: String,
    pub conditions: Expr,
    #[serde(skip)]
    contents: OnceLock<Arc<[u8]>>,
}

impl Document {
    pub fn new(name: String, out_file: String, conditions: Expr) -> Self {
        Self {
            name,
            out_file,
            conditions,
            contents: OnceLock::new(),
        }
    }

    /// Stores the document payload. Returns `false` if one was already attached.
    pub fn attach_contents(&self, bytes: Vec<u8>) -> bool {
        self.contents.set(Arc::from(bytes)).is_ok()
    }

    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.get().map(|bytes| &bytes[..])
    }

    pub fn is_loaded(&self) -> bool {
        self.contents.get().is_some()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("out_file", &self.out_file)
            .field("conditions", &self.conditions)
            .field("contents", &self.contents.get().map(|bytes| bytes.len()))
            .finish()
    }
}
