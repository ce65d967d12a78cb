use serde::{Deserialize, Serialize};

/// One output class of the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ClassSpec {
    pub fn new(label: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            display_name: Some(display_name.into()),
        }
    }

    /// Human readable name, falling back to the label.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.label)
    }
}

/// Ordered class set. Position in the set is the network output index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSet {
    specs: Vec<ClassSpec>,
}

impl ClassSet {
    pub fn new(specs: Vec<ClassSpec>) -> Self {
        Self { specs }
    }

    pub fn brain_tumor() -> Self {
        Self::new(vec![
            ClassSpec::new("Glioma", "Glioma Tumor"),
            ClassSpec::new("Meningioma", "Meningioma Tumor"),
            ClassSpec::new("Pituitary", "Pituitary Tumor"),
            ClassSpec::new("No_Tumor", "No Tumor Detected"),
        ])
    }

    /// Builds a set from bare labels, e.g. the labels stored with a model.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            labels
                .into_iter()
                .map(|label| ClassSpec {
                    label: label.into(),
                    display_name: None,
                })
                .collect(),
        )
    }

    pub fn specs(&self) -> &[ClassSpec] {
        &self.specs
    }

    pub fn labels(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.label.clone()).collect()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.specs.iter().position(|s| s.label == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    pub fn get(&self, index: usize) -> Option<&ClassSpec> {
        self.specs.get(index)
    }

    /// Display name for `label`; unknown labels are returned as-is.
    pub fn display_name<'a>(&'a self, label: &'a str) -> &'a str {
        self.specs
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.display_name())
            .unwrap_or(label)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
