// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A per-source store of versioned pipeline artefacts.
//!
//! Every stage that would destroy its input instead writes a new version under
//! a structured [`ArtifactId`]. Nothing is overwritten; stale versions must be
//! removed explicitly before their id can be reused, and rolling back means
//! pointing the workspace's current dataset at an older version.

use indexmap::IndexMap;
use log::{debug, trace};
use strum_macros::Display;
use thiserror::Error;

use crate::{
    image::ModelImage,
    solutions::CalibrationTable,
    vis::{FlagVersion, VisibilityDataset},
};

/// The pipeline stage that produced an artefact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Stage {
    #[strum(serialize = "input")]
    Input,

    #[strum(serialize = "selfcal")]
    SelfCal,

    #[strum(serialize = "selfcal_model")]
    SelfCalModel,

    #[strum(serialize = "selfcal_flags")]
    SelfCalFlags,

    #[strum(serialize = "selfcal_table")]
    SelfCalTable,

    /// The dataset with the complement model subtracted.
    #[strum(serialize = "peel_sub")]
    PeelSubtracted,

    /// The dataset calibrated in the peeled source's direction.
    #[strum(serialize = "peel_iso")]
    PeelIsolated,

    /// The dataset with the source peeled and everything else restored.
    #[strum(serialize = "peeled")]
    Peeled,

    #[strum(serialize = "peel_complement_model")]
    PeelComplementModel,

    #[strum(serialize = "peel_isolated_model")]
    PeelIsolatedModel,

    #[strum(serialize = "peel_refined_model")]
    PeelRefinedModel,

    #[strum(serialize = "peel_ph")]
    PeelPhase,

    #[strum(serialize = "peel_amp")]
    PeelAmplitude,

    #[strum(serialize = "peel_ph_inv")]
    PeelPhaseInverted,

    #[strum(serialize = "peel_amp_inv")]
    PeelAmplitudeInverted,

    /// The full-field image of a peeled dataset.
    #[strum(serialize = "peel_image")]
    PeelImage,

    /// The dataset with compact sources subtracted.
    #[strum(serialize = "sub")]
    Subtracted,

    /// The long-baseline model the compact sources were taken from.
    #[strum(serialize = "sub_model")]
    SubtractModel,

    #[strum(serialize = "lowres_model")]
    LowResModel,
}

impl Stage {
    /// Is this one of the intermediate artefacts of a single peel?
    pub fn is_peel_intermediate(self) -> bool {
        matches!(
            self,
            Stage::PeelSubtracted
                | Stage::PeelIsolated
                | Stage::PeelComplementModel
                | Stage::PeelIsolatedModel
                | Stage::PeelRefinedModel
                | Stage::PeelPhase
                | Stage::PeelAmplitude
                | Stage::PeelPhaseInverted
                | Stage::PeelAmplitudeInverted
        )
    }
}

/// A structured name for an artefact. The index is the self-cal cycle or the
/// peel number, depending on the stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId {
    pub source: String,
    pub stage: Stage,
    pub index: usize,
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}{:02}", self.source, self.stage, self.index)
    }
}

impl ArtifactId {
    /// A name for this artefact that is safe to use as a file name.
    pub fn file_stem(&self) -> String {
        format!("{}_{}{:02}", self.source, self.stage, self.index)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("A {kind} named '{id}' already exists; remove the stale version first")]
    Exists { kind: &'static str, id: String },

    #[error("No {kind} named '{id}' exists")]
    Missing { kind: &'static str, id: String },
}

/// All the artefacts of one kind.
#[derive(Debug, Clone)]
pub struct Shelf<T> {
    kind: &'static str,
    items: IndexMap<ArtifactId, T>,
}

impl<T> Shelf<T> {
    fn new(kind: &'static str) -> Shelf<T> {
        Shelf {
            kind,
            items: IndexMap::new(),
        }
    }

    /// Store a new version. Fails if the id is taken.
    pub fn insert(&mut self, id: ArtifactId, item: T) -> Result<(), StoreError> {
        if self.items.contains_key(&id) {
            return Err(StoreError::Exists {
                kind: self.kind,
                id: id.to_string(),
            });
        }
        trace!("Storing {} {id}", self.kind);
        self.items.insert(id, item);
        Ok(())
    }

    pub fn get(&self, id: &ArtifactId) -> Result<&T, StoreError> {
        self.items.get(id).ok_or_else(|| StoreError::Missing {
            kind: self.kind,
            id: id.to_string(),
        })
    }

    pub fn get_mut(&mut self, id: &ArtifactId) -> Result<&mut T, StoreError> {
        let kind = self.kind;
        self.items.get_mut(id).ok_or_else(|| StoreError::Missing {
            kind,
            id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.items.contains_key(id)
    }

    pub fn remove(&mut self, id: &ArtifactId) -> Option<T> {
        self.items.shift_remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ArtifactId> {
        self.items.keys()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn remove_matching<F: Fn(&ArtifactId) -> bool>(
        &mut self,
        pred: F,
        removed: &mut Vec<ArtifactId>,
    ) {
        self.items.retain(|id, _| {
            if pred(id) {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
    }
}

/// The artefact namespace of one source. Only one source may use a workspace
/// at a time.
#[derive(Debug, Clone)]
pub struct Workspace {
    source: String,
    pub datasets: Shelf<VisibilityDataset>,
    pub models: Shelf<ModelImage>,
    pub tables: Shelf<CalibrationTable>,
    pub flags: Shelf<FlagVersion>,
    current: ArtifactId,
    /// The dataset each derived dataset was made from.
    parents: IndexMap<ArtifactId, ArtifactId>,
}

impl Workspace {
    /// Make a new workspace whose current dataset is `input`.
    pub fn new(source: &str, input: VisibilityDataset) -> Workspace {
        let current = ArtifactId {
            source: source.to_string(),
            stage: Stage::Input,
            index: 0,
        };
        let mut datasets = Shelf::new("dataset");
        datasets.items.insert(current.clone(), input);
        Workspace {
            source: source.to_string(),
            datasets,
            models: Shelf::new("model"),
            tables: Shelf::new("calibration table"),
            flags: Shelf::new("flag version"),
            current,
            parents: IndexMap::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name an artefact of this workspace.
    pub fn id(&self, stage: Stage, index: usize) -> ArtifactId {
        ArtifactId {
            source: self.source.clone(),
            stage,
            index,
        }
    }

    pub fn current(&self) -> &ArtifactId {
        &self.current
    }

    /// Point the current dataset reference at another stored dataset.
    pub fn set_current(&mut self, id: ArtifactId) -> Result<(), StoreError> {
        if !self.datasets.contains(&id) {
            return Err(StoreError::Missing {
                kind: "dataset",
                id: id.to_string(),
            });
        }
        debug!("{}: current dataset is now {id}", self.source);
        self.current = id;
        Ok(())
    }

    /// Record that the dataset `child` was derived from the dataset `parent`.
    pub fn set_parent(&mut self, child: ArtifactId, parent: ArtifactId) -> Result<(), StoreError> {
        for id in [&child, &parent] {
            if !self.datasets.contains(id) {
                return Err(StoreError::Missing {
                    kind: "dataset",
                    id: id.to_string(),
                });
            }
        }
        trace!("{child} was made from {parent}");
        self.parents.insert(child, parent);
        Ok(())
    }

    /// The dataset that `id` was derived from, if that is known.
    pub fn parent(&self, id: &ArtifactId) -> Option<&ArtifactId> {
        self.parents.get(id)
    }

    pub fn current_dataset(&self) -> Result<&VisibilityDataset, StoreError> {
        self.datasets.get(&self.current)
    }

    pub fn current_dataset_mut(&mut self) -> Result<&mut VisibilityDataset, StoreError> {
        self.datasets.get_mut(&self.current)
    }

    /// Explicit garbage collection. Every artefact whose id satisfies `pred`
    /// is removed, except the current dataset. The removed ids are returned.
    pub fn remove_matching<F: Fn(&ArtifactId) -> bool>(&mut self, pred: F) -> Vec<ArtifactId> {
        let current = self.current.clone();
        let pred = |id: &ArtifactId| *id != current && pred(id);
        let mut removed = vec![];
        self.datasets.remove_matching(&pred, &mut removed);
        self.models.remove_matching(&pred, &mut removed);
        self.tables.remove_matching(&pred, &mut removed);
        self.flags.remove_matching(&pred, &mut removed);
        for id in &removed {
            trace!("Removed {id}");
            self.parents.shift_remove(id);
        }
        removed
    }

    /// Does anything in this workspace have this id?
    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.datasets.contains(id)
            || self.models.contains(id)
            || self.tables.contains(id)
            || self.flags.contains(id)
    }
}
