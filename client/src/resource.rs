use core::fmt;

use url::Url;

use crate::error::ClientError;

const SEP: char = '/';

/// Server endpoint address built up segment by segment.
#[derive(Clone, Debug)]
pub struct Resource {
    url: Url,
}

impl Resource {
    pub fn new(uri: &str) -> Result<Resource, ClientError> {
        let url = Url::parse(uri).map_err(|e| ClientError::InvalidUri(format!("{uri}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ClientError::InvalidUri(uri.to_owned()));
        }
        Ok(Resource { url })
    }

    /// Appends every non-empty part of a `/` separated path, keeping a trailing slash.
    #[must_use]
    pub fn join(&self, path: &str) -> Resource {
        let mut url = self.url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(path.split(SEP).filter(|s| !s.is_empty()));
            if path.ends_with(SEP) {
                segments.push("");
            }
        }
        Resource { url }
    }

    /// Appends `raw` as a single segment, escaping any `/` inside it.
    #[must_use]
    pub fn segment(&self, raw: &str) -> Resource {
        let mut url = self.url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(raw);
        }
        Resource { url }
    }

    #[must_use]
    pub fn url(&self) -> Url {
        self.url.clone()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
