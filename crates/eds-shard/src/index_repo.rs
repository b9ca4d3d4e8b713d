use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use eds_car::ShardIndex;
use eds_types::ShardKey;
use tracing::debug;

use crate::error::ShardResult;

const INDEX_EXT: &str = "index";

/// On-disk repository of full per-shard indices, one file per shard.
#[derive(Clone, Debug)]
pub struct FsIndexRepo {
    dir: PathBuf,
}

impl FsIndexRepo {
    pub fn open(dir: impl Into<PathBuf>) -> ShardResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &ShardKey) -> PathBuf {
        self.dir.join(format!("{key}.{INDEX_EXT}"))
    }

    /// Persist the index for `key`, replacing any previous one atomically.
    pub fn put(&self, key: &ShardKey, index: &ShardIndex) -> ShardResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&index.to_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(key = %key, blocks = index.len(), "full index stored");
        Ok(())
    }

    /// Load the index for `key`, if one is stored.
    pub fn get(&self, key: &ShardKey) -> ShardResult<Option<ShardIndex>> {
        match fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(ShardIndex::from_bytes(&data)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, key: &ShardKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Delete the index for `key`. Returns `false` if there was none.
    pub fn drop_index(&self, key: &ShardKey) -> ShardResult<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eds_car::BlockLocation;
    use eds_types::ContentId;

    fn sample_index() -> ShardIndex {
        ShardIndex::build(vec![(
            ContentId::from_bytes(b"block"),
            BlockLocation {
                offset: 64,
                len: 10,
                crc32: 99,
            },
        )])
    }

    #[test]
    fn put_get_drop() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsIndexRepo::open(dir.path().join("index")).unwrap();
        let key = ShardKey::from_string("abcd");

        assert!(repo.get(&key).unwrap().is_none());
        repo.put(&key, &sample_index()).unwrap();
        assert!(repo.exists(&key));
        assert_eq!(repo.get(&key).unwrap(), Some(sample_index()));

        assert!(repo.drop_index(&key).unwrap());
        assert!(!repo.drop_index(&key).unwrap());
        assert!(repo.get(&key).unwrap().is_none());
    }

    #[test]
    fn corrupt_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsIndexRepo::open(dir.path()).unwrap();
        let key = ShardKey::from_string("abcd");
        fs::write(dir.path().join("abcd.index"), b"garbage").unwrap();
        assert!(repo.get(&key).is_err());
    }
}
