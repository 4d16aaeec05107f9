use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Predictor, ProfileError};

const INDEX_FILE: &str = "index.map";
const PAYLOAD_EXTENSION: &str = "pred";

/// Line oriented index of the predictors stored in one folder: `<id>\t<identifier>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapFile {
    path: PathBuf,
    ids: BTreeMap<String, u64>,
}

impl MapFile {
    /// Read the index of `folder`. A missing index is an empty one.
    pub fn load(folder: &Path) -> Result<Self, ProfileError> {
        let path = folder.join(INDEX_FILE);
        let mut ids = BTreeMap::new();

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self { path, ids });
            }
            Err(e) => return Err(ProfileError::io(&path, e)),
        };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed = line
                .split_once('\t')
                .and_then(|(id, identifier)| Some((id.trim().parse::<u64>().ok()?, identifier)));
            let Some((id, identifier)) = parsed else {
                return Err(ProfileError::Format {
                    path,
                    reason: format!("bad index line {line:?}"),
                });
            };
            ids.insert(identifier.to_owned(), id);
        }

        Ok(Self { path, ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<u64> {
        self.ids.get(identifier).copied()
    }

    pub fn put(&mut self, identifier: &str, id: u64) {
        self.ids.insert(identifier.to_owned(), id);
    }

    /// Location of the payload with the given id, next to the index.
    pub fn payload_path(&self, id: u64) -> PathBuf {
        let folder = self.path.parent().unwrap_or_else(|| Path::new("."));
        folder.join(format!("{id}.{PAYLOAD_EXTENSION}"))
    }

    /// Write the index through a temporary file so readers never see a partial index.
    pub fn save(&self) -> Result<(), ProfileError> {
        let mut by_id: Vec<(&u64, &String)> = self.ids.iter().map(|(k, v)| (v, k)).collect();
        by_id.sort();

        let mut contents = String::from("# predictor index: id, identifier\n");
        for (id, identifier) in by_id {
            contents.push_str(&format!("{id}\t{identifier}\n"));
        }

        let tmp = self.path.with_extension("map.tmp");
        fs::write(&tmp, contents).map_err(|e| ProfileError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| ProfileError::io(&self.path, e))
    }
}

/// Folder layout and persistence of predictors below a base path.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    base: PathBuf,
}

impl ProfileStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// One subfolder per `:` segment of the identifier before its first `;`, then `kind`.
    pub fn folder(&self, identifier: &str, kind: &str) -> PathBuf {
        let nesting = identifier.split(';').next().unwrap_or_default();
        let mut folder = self.base.clone();
        for segment in nesting.split(':').filter(|s| !s.is_empty()) {
            folder.push(segment);
        }
        folder.push(kind);
        folder
    }

    /// Write the predictor, allocating an id in the folder index on first store.
    pub fn store(
        &self,
        predictor: &dyn Predictor,
        identifier: &str,
    ) -> Result<PathBuf, ProfileError> {
        let folder = self.folder(identifier, predictor.kind());
        fs::create_dir_all(&folder).map_err(|e| ProfileError::io(&folder, e))?;

        let mut index = MapFile::load(&folder)?;
        let (id, new_entry) = match index.get(identifier) {
            Some(id) => (id, false),
            None => (index.len() as u64 + 1, true),
        };

        let payload = index.payload_path(id);
        predictor.store(&payload, identifier)?;

        if new_entry {
            index.put(identifier, id);
            index.save()?;
        }
        tracing::debug!(identifier, id, path = %payload.display(), "stored predictor");
        Ok(payload)
    }

    pub fn load(&self, predictor: &mut dyn Predictor, identifier: &str) -> Result<(), ProfileError> {
        let folder = self.folder(identifier, predictor.kind());
        let index = MapFile::load(&folder)?;
        let id = index
            .get(identifier)
            .ok_or_else(|| ProfileError::NotFound(identifier.to_owned()))?;
        predictor.load(&index.payload_path(id), identifier)
    }
}
