use std::{
    collections::HashMap,
    fmt::Debug,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use zip::{ZipArchive, result::ZipError};

use crate::{
    class::{ClassFile, parser},
    runtime::{Exception, VmResult, famous_classes::CLASS_FORMAT_ERROR},
};

/// Somewhere class files can be read from, keyed by internal class name.
pub trait ClassSource: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` if the class is not in this source.
    fn find_class_file(&self, class_name: &str) -> VmResult<Option<Arc<ClassFile>>>;
}

fn parse_class_bytes(class_name: &str, bytes: &[u8]) -> VmResult<Arc<ClassFile>> {
    let class_file = parser::class_file(bytes).map_err(|err| {
        let err = Exception::from(err);
        Exception::linkage(
            CLASS_FORMAT_ERROR,
            format!("{class_name}: {}", err.message()),
        )
    })?;
    Ok(Arc::new(class_file))
}

/// A class-path directory, `a/b/C` is read from `<base>/a/b/C.class`.
#[derive(Debug)]
pub struct DirectorySource {
    name: String,
    base_path: PathBuf,
}

impl DirectorySource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            name: base_path.display().to_string(),
            base_path,
        }
    }
}

impl ClassSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_class_file(&self, class_name: &str) -> VmResult<Option<Arc<ClassFile>>> {
        let path = self.base_path.join(format!("{class_name}.class"));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        parse_class_bytes(class_name, &bytes).map(Some)
    }
}

/// A jar or jmod archive. Jmods keep their classes under `classes/`.
#[derive(Debug)]
pub struct ArchiveSource {
    name: String,
    prefix: &'static str,
    archive: Mutex<ZipArchive<File>>,
}

impl ArchiveSource {
    pub fn open(path: impl AsRef<Path>) -> VmResult<Self> {
        let path = path.as_ref();
        let prefix = match path.extension().and_then(|ext| ext.to_str()) {
            Some("jmod") => "classes/",
            _ => "",
        };
        let archive = ZipArchive::new(File::open(path)?)?;
        Ok(Self {
            name: path.display().to_string(),
            prefix,
            archive: Mutex::new(archive),
        })
    }

    pub fn prefix(&self) -> &str {
        self.prefix
    }
}

impl ClassSource for ArchiveSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_class_file(&self, class_name: &str) -> VmResult<Option<Arc<ClassFile>>> {
        let entry_name = format!("{}{class_name}.class", self.prefix);
        let bytes = {
            let mut archive = self.archive.lock();
            let mut entry = match archive.by_name(&entry_name) {
                Ok(entry) => entry,
                Err(ZipError::FileNotFound) => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            bytes
        };
        parse_class_bytes(class_name, &bytes).map(Some)
    }
}

/// Already parsed class files, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    classes: HashMap<Arc<str>, Arc<ClassFile>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class_file: ClassFile) -> VmResult<()> {
        let name = class_file
            .this_class_name()
            .ok_or_else(|| Exception::linkage(CLASS_FORMAT_ERROR, "invalid this_class entry"))?;
        self.classes.insert(name, Arc::new(class_file));
        Ok(())
    }

    pub fn insert_bytes(&mut self, bytes: &[u8]) -> VmResult<()> {
        let class_file = parser::class_file(bytes)?;
        self.insert(class_file)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn find_class_file(&self, class_name: &str) -> VmResult<Option<Arc<ClassFile>>> {
        Ok(self.classes.get(class_name).cloned())
    }
}

/// One source per class-path entry: directories, `.jar` and `.jmod` files.
pub fn sources_from_class_path(class_path: &[PathBuf]) -> VmResult<Vec<Box<dyn ClassSource>>> {
    class_path
        .iter()
        .map(|entry| -> VmResult<Box<dyn ClassSource>> {
            if entry.is_dir() {
                Ok(Box::new(DirectorySource::new(entry)))
            } else {
                Ok(Box::new(ArchiveSource::open(entry)?))
            }
        })
        .collect()
}
