/// Selects source objects by a marker substring and a file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFilter {
    marker: String,
    extension: String,
}

impl SourceFilter {
    pub fn new(marker: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            extension: extension.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn matches(&self, name: &str) -> bool {
        name.contains(&self.marker) && name.ends_with(&self.extension)
    }
}
