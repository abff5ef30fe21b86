//! Settings for grammar resolution and element generation

/// Binds documents whose path matches `pattern` to the grammar `system_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAssociation {
    /// Glob over the document path, e.g. `**/*.web.xml`
    pub pattern: String,
    /// Grammar URI or absolute path
    pub system_id: String,
}

impl FileAssociation {
    pub fn new(pattern: impl Into<String>, system_id: impl Into<String>) -> Self {
        FileAssociation {
            pattern: pattern.into(),
            system_id: system_id.into(),
        }
    }
}

/// Content model manager settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentModelSettings {
    /// Keep loaded grammars between requests
    pub use_cache: bool,
    /// Maximum number of cached grammar resources
    pub cache_capacity: usize,
    /// XML catalog files (URIs or paths), searched in order
    pub catalogs: Vec<String>,
    pub file_associations: Vec<FileAssociation>,
    /// Allow `http`/`https` grammar locations
    pub download_enabled: bool,
}

impl Default for ContentModelSettings {
    fn default() -> Self {
        ContentModelSettings {
            use_cache: true,
            cache_capacity: 64,
            catalogs: Vec::new(),
            file_associations: Vec::new(),
            download_enabled: true,
        }
    }
}

impl ContentModelSettings {
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalogs.push(catalog.into());
        self
    }

    pub fn with_file_association(mut self, association: FileAssociation) -> Self {
        self.file_associations.push(association);
        self
    }

    pub fn with_download(mut self, enabled: bool) -> Self {
        self.download_enabled = enabled;
        self
    }
}

/// Element generation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSettings {
    /// One indentation level
    pub indent: String,
    pub line_delimiter: String,
    /// Emit tab stops, placeholders and choices
    pub snippets: bool,
    /// Child levels generated below the requested element
    pub max_depth: usize,
    pub auto_close_tags: bool,
    /// Generate only children that are not optional
    pub only_required: bool,
    /// Attribute value quote
    pub quote: char,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        GeneratorSettings {
            indent: "\t".to_string(),
            line_delimiter: "\n".to_string(),
            snippets: true,
            max_depth: 1,
            auto_close_tags: true,
            only_required: true,
            quote: '"',
        }
    }
}

impl GeneratorSettings {
    pub fn with_indent(mut self, indent: impl Into<String>) -> Self {
        self.indent = indent.into();
        self
    }

    pub fn with_line_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.line_delimiter = delimiter.into();
        self
    }

    pub fn with_snippets(mut self, snippets: bool) -> Self {
        self.snippets = snippets;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_auto_close_tags(mut self, auto_close: bool) -> Self {
        self.auto_close_tags = auto_close;
        self
    }

    pub fn with_only_required(mut self, only_required: bool) -> Self {
        self.only_required = only_required;
        self
    }

    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = quote;
        self
    }
}
