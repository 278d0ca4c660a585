use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmOptions {
    /// Directories, `.jar` and `.jmod` files, searched in order.
    pub class_path: Vec<PathBuf>,
    /// Log class definitions at `info` instead of `debug`.
    pub verbose_class_loading: bool,
}

impl VmOptions {
    pub fn with_class_path<I, P>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.class_path.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn verbose_class_loading(mut self, verbose: bool) -> Self {
        self.verbose_class_loading = verbose;
        self
    }
}
