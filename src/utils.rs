use std::fmt;
use std::future::Future;

/// Blocking bridge over the async `taos` client.
///
/// The public driver surface is synchronous. Native transport calls reuse the
/// caller's Tokio runtime when one is running (via `block_in_place`, which
/// requires a multi-threaded runtime) and otherwise drive an owned runtime.
pub enum Runtime {
    Handle(tokio::runtime::Handle),
    Owned(tokio::runtime::Runtime),
}

impl Runtime {
    pub fn new() -> std::io::Result<Self> {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            return Ok(Self::Handle(handle));
        }
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("taos-driver")
            .build()?;
        Ok(Self::Owned(rt))
    }

    /// Runs `fut` to completion on the calling thread.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        match self {
            Runtime::Handle(handle) => tokio::task::block_in_place(|| handle.block_on(fut)),
            Runtime::Owned(runtime) => runtime.block_on(fut),
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Runtime::Handle(_) => f.write_str("Runtime::Handle(...)"),
            Runtime::Owned(_) => f.write_str("Runtime::Owned(...)"),
        }
    }
}

/// Splits SQL text at `?` placeholders that sit outside quoted literals and
/// backquoted identifiers.
///
/// The returned fragments interleave with the placeholders, so a text with
/// `n` placeholders yields `n + 1` fragments.
pub(crate) fn split_placeholders(sql: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (idx, c) in sql.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '?') => {
                fragments.push(&sql[start..idx]);
                start = idx + 1;
            }
            (None, _) => {}
        }
    }
    fragments.push(&sql[start..]);
    fragments
}
