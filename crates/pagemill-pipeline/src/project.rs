//! Project persistence.
//!
//! A project file is a JSON document carrying the page catalog, every
//! stage's settings store, naming state, and the output directory.
//! Writing is deterministic (stores iterate in page order), so
//! load → save → load round-trips to an equivalent document. Reading
//! fails fast on malformed documents, unsupported versions, and a
//! missing output directory — before any processing starts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::context::ProcessingContext;
use crate::error::ProjectError;
use crate::naming::OutputFileNameGenerator;
use crate::pages::{ImageId, LayoutDirection, PageCatalog, PageId, SourceRecord};
use crate::settings::{Relinker, SettingsStore};
use crate::stages::{
    StageSequence, deskew, orientation, output, page_layout, select_content, split,
};

/// Version written into every document. Readers reject anything newer.
pub const FORMAT_VERSION: u32 = 1;

/// Everything a project file restores.
#[derive(Debug)]
pub struct Project {
    /// The ordered source images and their splits.
    pub catalog: PageCatalog,
    /// The six stages with their restored settings stores.
    pub stages: StageSequence,
    /// Output naming state.
    pub naming: OutputFileNameGenerator,
    /// Directory rendered pages are written into.
    pub output_dir: PathBuf,
}

impl Project {
    /// Assemble a processing context from the restored state.
    #[must_use]
    pub fn into_context(self) -> ProcessingContext {
        ProcessingContext::new(self.stages, self.output_dir).with_naming(self.naming)
    }

    /// Remove a source image everywhere at once: catalog, every
    /// stage's settings store, and the naming registration. Settings
    /// are never implicitly dropped except through this path.
    pub fn remove_image(&mut self, image: &ImageId) {
        for page in self.catalog.remove_image(image) {
            self.stages.remove_page(&page);
        }
        self.naming.unregister(image);
    }
}

#[derive(Serialize, Deserialize)]
struct SettingsEntry<P> {
    page: PageId,
    params: P,
}

#[derive(Serialize, Deserialize)]
struct StageSettingsDoc {
    orientation: Vec<SettingsEntry<orientation::Params>>,
    split: Vec<SettingsEntry<split::Params>>,
    deskew: Vec<SettingsEntry<deskew::Params>>,
    select_content: Vec<SettingsEntry<select_content::Params>>,
    page_layout: Vec<SettingsEntry<page_layout::Params>>,
    output: Vec<SettingsEntry<output::Params>>,
}

#[derive(Serialize, Deserialize)]
struct ProjectDoc {
    version: u32,
    output_dir: PathBuf,
    layout_direction: LayoutDirection,
    sources: Vec<SourceRecord>,
    naming: OutputFileNameGenerator,
    settings: StageSettingsDoc,
}

fn store_to_doc<P: Clone + Default + Serialize>(
    store: &SettingsStore<P>,
) -> Vec<SettingsEntry<P>> {
    store
        .iter()
        .map(|(page, params)| SettingsEntry {
            page: page.clone(),
            params: params.clone(),
        })
        .collect()
}

fn store_from_doc<P: Clone + Default + DeserializeOwned>(
    entries: Vec<SettingsEntry<P>>,
) -> SettingsStore<P> {
    let mut store = SettingsStore::new();
    for entry in entries {
        store.set(entry.page, entry.params);
    }
    store
}

/// Serialize a project to JSON text.
///
/// # Errors
///
/// Fails only if serialization itself fails.
pub fn to_string(project: &Project) -> Result<String, ProjectError> {
    let doc = ProjectDoc {
        version: FORMAT_VERSION,
        output_dir: project.output_dir.clone(),
        layout_direction: project.catalog.layout_direction(),
        sources: project.catalog.sources().to_vec(),
        naming: project.naming.clone(),
        settings: StageSettingsDoc {
            orientation: store_to_doc(&project.stages.orientation.settings),
            split: store_to_doc(&project.stages.split.settings),
            deskew: store_to_doc(&project.stages.deskew.settings),
            select_content: store_to_doc(&project.stages.select_content.settings),
            page_layout: store_to_doc(&project.stages.page_layout.settings),
            output: store_to_doc(&project.stages.output.settings),
        },
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Write a project file.
///
/// # Errors
///
/// Fails on serialization or I/O errors.
pub fn write(project: &Project, path: &Path) -> Result<(), ProjectError> {
    let text = to_string(project)?;
    fs::write(path, text)?;
    Ok(())
}

/// Parse a project from JSON text.
///
/// # Errors
///
/// Fails on malformed documents, unsupported versions, or an empty
/// output directory.
pub fn from_str(text: &str) -> Result<Project, ProjectError> {
    let doc: ProjectDoc = serde_json::from_str(text)?;
    if doc.version > FORMAT_VERSION {
        return Err(ProjectError::UnsupportedVersion(doc.version));
    }
    if doc.output_dir.as_os_str().is_empty() {
        return Err(ProjectError::MissingOutputDirectory);
    }

    let stages = StageSequence {
        orientation: orientation::Stage {
            settings: store_from_doc(doc.settings.orientation),
        },
        split: split::Stage {
            settings: store_from_doc(doc.settings.split),
        },
        deskew: deskew::Stage {
            settings: store_from_doc(doc.settings.deskew),
        },
        select_content: select_content::Stage {
            settings: store_from_doc(doc.settings.select_content),
        },
        page_layout: page_layout::Stage {
            settings: store_from_doc(doc.settings.page_layout),
        },
        output: output::Stage {
            settings: store_from_doc(doc.settings.output),
        },
    };

    Ok(Project {
        catalog: PageCatalog::from_sources(doc.sources, doc.layout_direction),
        stages,
        naming: doc.naming,
        output_dir: doc.output_dir,
    })
}

/// Read a project file.
///
/// # Errors
///
/// Fails on I/O errors and everything [`from_str`] rejects.
pub fn read(path: &Path) -> Result<Project, ProjectError> {
    let text = fs::read_to_string(path)?;
    from_str(&text)
}

/// Read a project file and apply a relinking pass: the catalog, every
/// settings store, and the naming state all follow the rewritten
/// paths.
///
/// # Errors
///
/// Same failure modes as [`read`].
pub fn read_with_relinker(path: &Path, relinker: &Relinker) -> Result<Project, ProjectError> {
    let mut project = read(path)?;
    if !relinker.is_empty() {
        project.catalog.perform_relinking(relinker);
        project.stages.perform_relinking(relinker);
        project
            .naming
            .perform_relinking(|p| relinker.rewrite(p));
    }
    Ok(project)
}
