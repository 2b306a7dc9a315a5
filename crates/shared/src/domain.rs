use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::ParseKindError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(TabId);
id_newtype!(CanvasTarget);
id_newtype!(PanelTarget);

/// A model element as seen by the host: a stable id plus an optional
/// human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelElement {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Shared handle to a [`ModelElement`].
///
/// Two handles refer to the *same* element only when they point at the same
/// allocation. A re-import produces fresh handles for logically identical
/// elements; compare [`ElementRef::id`] to match those.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementRef(Arc<ModelElement>);

impl ElementRef {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self(Arc::new(ModelElement {
            id: id.into(),
            name,
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// Identity comparison.
    pub fn is(&self, other: &ElementRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    Drd,
    DecisionTable,
    LiteralExpression,
}

impl SheetKind {
    pub fn is_diagram(self) -> bool {
        self == SheetKind::Drd
    }

    /// Label used when a sheet's element carries no name.
    pub fn fallback_name(self) -> &'static str {
        match self {
            SheetKind::Drd => "Diagram",
            SheetKind::DecisionTable => "Decision Table",
            SheetKind::LiteralExpression => "Literal Expression",
        }
    }

    /// Whether viewers of this kind render to a vector image and can
    /// therefore be exported.
    pub fn supports_vector_export(self) -> bool {
        matches!(self, SheetKind::Drd)
    }

    /// Lower values are preferred when an engine picks its initial view.
    pub fn initial_view_priority(self) -> u8 {
        match self {
            SheetKind::Drd => 0,
            SheetKind::DecisionTable => 1,
            SheetKind::LiteralExpression => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Svg,
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn is_vector(self) -> bool {
        self == ExportFormat::Svg
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Svg => "svg",
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpeg",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ParseKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(ExportFormat::Svg),
            "png" => Ok(ExportFormat::Png),
            "jpeg" | "jpg" => Ok(ExportFormat::Jpeg),
            other => Err(ParseKindError::new("export format", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalKind {
    DeployDiagram,
}
