use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct GenerateInput {
    pub prompt: String,
    pub model: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<u64>,
}

impl GenerateInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Edit request. `source_image` and `mask` accept a `data:` URL, an absolute
/// path or a `file://` URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EditInput {
    pub prompt: String,
    pub source_image: String,
    pub model: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<u64>,
    pub mask: Option<String>,
}

impl EditInput {
    pub fn new(prompt: impl Into<String>, source_image: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            source_image: source_image.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_mask(mut self, mask: impl Into<String>) -> Self {
        self.mask = Some(mask.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn to_data_url(&self) -> String {
        encode_data_url(&self.bytes, &self.mime_type)
    }
}

impl Serialize for GeneratedImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("GeneratedImage", 2)?;
        state.serialize_field("mimeType", &self.mime_type)?;
        state.serialize_field("dataUrl", &self.to_data_url())?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderResult {
    pub provider: String,
    pub model: String,
    pub images: Vec<GeneratedImage>,
}

impl ProviderResult {
    pub fn new(provider: &str, model: &str, images: Vec<GeneratedImage>) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            images,
        }
    }

    pub fn first(&self) -> Option<&GeneratedImage> {
        self.images.first()
    }
}

pub fn encode_data_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}
