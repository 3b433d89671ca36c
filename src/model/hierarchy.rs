//! Object hierarchy: TMA cores and the annotations drawn inside them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::roi::Roi;
use crate::constants::MAX_PENDING_EVENTS;
use crate::error::AlignError;

/// Unique identifier for an object in the hierarchy.
pub type ObjectId = u32;

/// What an object in the hierarchy represents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectKind {
    /// A tissue microarray core, the container annotations are aligned within.
    TmaCore {
        name: String,
        /// Cores flagged missing have no tissue and are skipped.
        #[serde(default)]
        missing: bool,
    },
    /// A user annotation.
    Annotation {
        #[serde(default)]
        classification: Option<String>,
    },
}

/// An object with geometry and an optional parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathObject {
    pub id: ObjectId,
    #[serde(default)]
    pub parent: Option<ObjectId>,
    #[serde(flatten)]
    pub kind: ObjectKind,
    pub roi: Roi,
}

impl PathObject {
    pub fn is_annotation(&self) -> bool {
        matches!(self.kind, ObjectKind::Annotation { .. })
    }

    pub fn is_tma_core(&self) -> bool {
        matches!(self.kind, ObjectKind::TmaCore { .. })
    }
}

/// Change notification emitted by the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub enum HierarchyEvent {
    /// Geometry of some objects below `parent` was replaced.
    RoisChanged {
        parent: ObjectId,
        changed: Vec<ObjectId>,
    },
}

/// The collaborator contract the alignment pipeline needs from a document.
///
/// The pipeline reads through this trait and never holds on to the
/// hierarchy; writes happen once, after a run has finished.
pub trait AnnotationHierarchy {
    /// ROI of any object, if it exists.
    fn roi_of(&self, id: ObjectId) -> Option<Roi>;

    /// Descendant annotations of `parent` that have no children themselves.
    fn leaf_annotations(&self, parent: ObjectId) -> Vec<(ObjectId, Roi)>;

    /// Replace the ROI of an existing object.
    fn replace_roi(&mut self, id: ObjectId, roi: Roi) -> Result<(), AlignError>;

    /// Announce that geometry below `parent` changed.
    fn notify_changed(&mut self, parent: ObjectId, changed: &[ObjectId]);
}

/// In-memory object hierarchy.
#[derive(Debug, Clone, Default)]
pub struct ObjectHierarchy {
    objects: BTreeMap<ObjectId, PathObject>,
    children: BTreeMap<ObjectId, Vec<ObjectId>>,
    next_id: ObjectId,
    /// Undrained change events, oldest first, at most `MAX_PENDING_EVENTS`
    events: VecDeque<HierarchyEvent>,
}

impl ObjectHierarchy {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Add a TMA core at the root and return its id.
    pub fn add_tma_core(
        &mut self,
        name: impl Into<String>,
        roi: Roi,
    ) -> Result<ObjectId, AlignError> {
        let id = self.allocate_id()?;
        self.objects.insert(
            id,
            PathObject {
                id,
                parent: None,
                kind: ObjectKind::TmaCore {
                    name: name.into(),
                    missing: false,
                },
                roi,
            },
        );
        Ok(id)
    }

    /// Add an annotation under `parent` (or at the root) and return its id.
    pub fn add_annotation(
        &mut self,
        parent: Option<ObjectId>,
        roi: Roi,
        classification: Option<String>,
    ) -> Result<ObjectId, AlignError> {
        if let Some(p) = parent {
            if !self.objects.contains_key(&p) {
                return Err(AlignError::ObjectNotFound { id: p });
            }
        }
        let id = self.allocate_id()?;
        self.objects.insert(
            id,
            PathObject {
                id,
                parent,
                kind: ObjectKind::Annotation { classification },
                roi,
            },
        );
        if let Some(p) = parent {
            self.children.entry(p).or_default().push(id);
        }
        Ok(id)
    }

    /// Insert a fully formed object, e.g. one read from a project file.
    ///
    /// Parents must be inserted before their children and ids must be unique.
    pub fn insert(&mut self, object: PathObject) -> Result<(), AlignError> {
        if self.objects.contains_key(&object.id) {
            return Err(AlignError::DuplicateObject { id: object.id });
        }
        if let Some(p) = object.parent {
            if !self.objects.contains_key(&p) {
                return Err(AlignError::ObjectNotFound { id: p });
            }
            self.children.entry(p).or_default().push(object.id);
        }
        self.next_id = self.next_id.max(object.id.saturating_add(1));
        self.objects.insert(object.id, object);
        Ok(())
    }

    fn allocate_id(&mut self) -> Result<ObjectId, AlignError> {
        let id = self.next_id.max(1);
        if self.objects.contains_key(&id) {
            return Err(AlignError::IdsExhausted);
        }
        // `next_id` stays on the last id once it is handed out
        self.next_id = id.checked_add(1).unwrap_or(id);
        Ok(id)
    }

    /// Flag a core as missing (or not).
    pub fn set_missing(&mut self, id: ObjectId, value: bool) -> Result<(), AlignError> {
        match self.objects.get_mut(&id).map(|o| &mut o.kind) {
            Some(ObjectKind::TmaCore { missing, .. }) => {
                *missing = value;
                Ok(())
            }
            Some(_) => Err(AlignError::NotAContainer { id }),
            None => Err(AlignError::ObjectNotFound { id }),
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&PathObject> {
        self.objects.get(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over all objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = &PathObject> {
        self.objects.values()
    }

    /// Direct children of an object.
    pub fn children(&self, id: ObjectId) -> &[ObjectId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_children(&self, id: ObjectId) -> bool {
        !self.children(id).is_empty()
    }

    /// All descendants of an object, depth first.
    pub fn descendants(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack: Vec<ObjectId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Ids of all TMA cores, including missing ones.
    pub fn tma_cores(&self) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|o| o.is_tma_core())
            .map(|o| o.id)
            .collect()
    }

    /// Drain pending change notifications.
    ///
    /// Only the most recent [`MAX_PENDING_EVENTS`] are kept between drains.
    pub fn take_events(&mut self) -> Vec<HierarchyEvent> {
        self.events.drain(..).collect()
    }
}

impl AnnotationHierarchy for ObjectHierarchy {
    fn roi_of(&self, id: ObjectId) -> Option<Roi> {
        self.objects.get(&id).map(|o| o.roi.clone())
    }

    fn leaf_annotations(&self, parent: ObjectId) -> Vec<(ObjectId, Roi)> {
        self.descendants(parent)
            .into_iter()
            .filter_map(|id| self.objects.get(&id))
            .filter(|o| o.is_annotation() && !self.has_children(o.id))
            .map(|o| (o.id, o.roi.clone()))
            .collect()
    }

    fn replace_roi(&mut self, id: ObjectId, roi: Roi) -> Result<(), AlignError> {
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(AlignError::ObjectNotFound { id })?;
        object.roi = roi;
        Ok(())
    }

    fn notify_changed(&mut self, parent: ObjectId, changed: &[ObjectId]) {
        log::debug!(
            "Hierarchy changed under {}: {} objects",
            parent,
            changed.len()
        );
        if self.events.len() >= MAX_PENDING_EVENTS {
            self.events.pop_front();
            log::trace!("Event log full, dropped the oldest change event");
        }
        self.events.push_back(HierarchyEvent::RoisChanged {
            parent,
            changed: changed.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (ObjectHierarchy, ObjectId, ObjectId, ObjectId, ObjectId) {
        let mut h = ObjectHierarchy::new();
        let core = h
            .add_tma_core("A-1", Roi::ellipse(0.0, 0.0, 100.0, 100.0))
            .unwrap();
        let outer = h
            .add_annotation(Some(core), Roi::rectangle(10.0, 10.0, 60.0, 60.0), None)
            .unwrap();
        let inner = h
            .add_annotation(
                Some(outer),
                Roi::rectangle(20.0, 20.0, 10.0, 10.0),
                Some("Tumor".to_string()),
            )
            .unwrap();
        let sibling = h
            .add_annotation(Some(core), Roi::rectangle(70.0, 70.0, 10.0, 10.0), None)
            .unwrap();
        (h, core, outer, inner, sibling)
    }

    #[test]
    fn test_leaf_annotations_exclude_parents() {
        let (h, core, outer, inner, sibling) = sample();
        let ids: Vec<ObjectId> = h.leaf_annotations(core).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![inner, sibling]);
        assert!(!ids.contains(&outer));
    }

    #[test]
    fn test_descendants_depth_first() {
        let (h, core, outer, inner, sibling) = sample();
        assert_eq!(h.descendants(core), vec![outer, inner, sibling]);
        assert!(h.descendants(inner).is_empty());
    }

    #[test]
    fn test_add_annotation_unknown_parent() {
        let mut h = ObjectHierarchy::new();
        let err = h.add_annotation(Some(42), Roi::rectangle(0.0, 0.0, 1.0, 1.0), None);
        assert!(matches!(err, Err(AlignError::ObjectNotFound { id: 42 })));
    }

    #[test]
    fn test_replace_roi_and_events() {
        let (mut h, core, _, inner, _) = sample();
        let roi = Roi::rectangle(21.0, 21.0, 10.0, 10.0);
        h.replace_roi(inner, roi.clone()).unwrap();
        h.notify_changed(core, &[inner]);
        assert_eq!(h.roi_of(inner), Some(roi));
        assert_eq!(
            h.take_events(),
            vec![HierarchyEvent::RoisChanged {
                parent: core,
                changed: vec![inner]
            }]
        );
        assert!(h.take_events().is_empty());
        assert!(h.replace_roi(999, Roi::Point { x: 0.0, y: 0.0 }).is_err());
    }

    #[test]
    fn test_insert_keeps_ids_unique() {
        let mut h = ObjectHierarchy::new();
        h.insert(PathObject {
            id: 7,
            parent: None,
            kind: ObjectKind::TmaCore {
                name: "B-2".to_string(),
                missing: false,
            },
            roi: Roi::ellipse(0.0, 0.0, 10.0, 10.0),
        })
        .unwrap();
        let next = h
            .add_annotation(Some(7), Roi::rectangle(1.0, 1.0, 2.0, 2.0), None)
            .unwrap();
        assert_eq!(next, 8);
        assert_eq!(h.tma_cores(), vec![7]);
    }

    #[test]
    fn test_event_log_is_bounded() {
        let (mut h, core, _, inner, _) = sample();
        for _ in 0..MAX_PENDING_EVENTS + 5 {
            h.notify_changed(core, &[inner]);
        }
        h.notify_changed(core, &[]);
        let events = h.take_events();
        assert_eq!(events.len(), MAX_PENDING_EVENTS);
        assert_eq!(
            events.last(),
            Some(&HierarchyEvent::RoisChanged {
                parent: core,
                changed: vec![]
            })
        );
    }

    fn core_with_id(id: ObjectId) -> PathObject {
        PathObject {
            id,
            parent: None,
            kind: ObjectKind::TmaCore {
                name: format!("core-{}", id),
                missing: false,
            },
            roi: Roi::ellipse(0.0, 0.0, 10.0, 10.0),
        }
    }

    #[test]
    fn test_insert_duplicate_id() {
        let mut h = ObjectHierarchy::new();
        h.insert(core_with_id(3)).unwrap();
        let err = h.insert(core_with_id(3)).unwrap_err();
        assert!(matches!(err, AlignError::DuplicateObject { id: 3 }));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_ids_exhausted_after_max_id() {
        let mut h = ObjectHierarchy::new();
        h.insert(core_with_id(ObjectId::MAX)).unwrap();
        let err = h
            .add_annotation(Some(ObjectId::MAX), Roi::rectangle(1.0, 1.0, 2.0, 2.0), None)
            .unwrap_err();
        assert!(matches!(err, AlignError::IdsExhausted));
        assert!(matches!(
            h.add_tma_core("late", Roi::ellipse(0.0, 0.0, 5.0, 5.0)),
            Err(AlignError::IdsExhausted)
        ));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_set_missing() {
        let (mut h, core, outer, _, _) = sample();
        h.set_missing(core, true).unwrap();
        assert!(matches!(
            h.get(core).unwrap().kind,
            ObjectKind::TmaCore { missing: true, .. }
        ));
        assert!(matches!(
            h.set_missing(outer, true),
            Err(AlignError::NotAContainer { .. })
        ));
    }
}
