use bytes::Bytes;

/// A file as handed over by the client, before any validation.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: Option<String>,
    pub mime_type: String,
    pub payload: Bytes,
}

impl IncomingFile {
    pub fn new(mime_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            file_name: None,
            mime_type: mime_type.into(),
            payload: payload.into(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}
