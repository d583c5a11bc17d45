//! Mutation semantics over a record view.
//!
//! The same rules run twice for every change: once against a context's
//! working copies when the change is staged, and once against the store
//! when the context commits. Both callers wrap their view in a [`Journal`]
//! so a failing batch can be undone without leaving half-applied edges.

use crate::error::{CoreError, CoreResult};
use crate::record::{FieldValue, Record, RecordId};
use crate::schema::{Cardinality, DeleteRule, EntitySchema, Schema};
use crate::store::mutation::{Fields, Links, Mutation};
use crate::wal::WalWrite;
use std::collections::HashMap;

/// Mutable access to the current version of records.
pub(crate) trait GraphView {
    /// Current version of `id`, if it exists.
    fn load(&self, id: RecordId) -> Option<Record>;
    /// Stores a new version.
    fn put(&mut self, record: Record);
    /// Removes a record.
    fn remove(&mut self, id: RecordId);
}

/// Wraps a view and remembers the first pre-image of every touched record.
pub(crate) struct Journal<'a, V: GraphView> {
    view: &'a mut V,
    before: HashMap<RecordId, Option<Record>>,
    touched: Vec<RecordId>,
}

impl<'a, V: GraphView> Journal<'a, V> {
    pub(crate) fn new(view: &'a mut V) -> Self {
        Self {
            view,
            before: HashMap::new(),
            touched: Vec::new(),
        }
    }

    fn touch(&mut self, id: RecordId) {
        if !self.before.contains_key(&id) {
            let pre = self.view.load(id);
            self.before.insert(id, pre);
            self.touched.push(id);
        }
    }

    /// Restores every touched record to its pre-image.
    pub(crate) fn undo(self) {
        for (id, pre) in self.before {
            match pre {
                Some(record) => self.view.put(record),
                None => self.view.remove(id),
            }
        }
    }

    /// Net effect of the batch, in first-touch order.
    pub(crate) fn writes(&self) -> Vec<WalWrite> {
        self.touched
            .iter()
            .filter_map(|id| {
                let post = self.view.load(*id);
                if post == self.before[id] {
                    return None;
                }
                Some(match post {
                    Some(record) => WalWrite::Put(record),
                    None => WalWrite::Delete { id: *id },
                })
            })
            .collect()
    }
}

impl<V: GraphView> GraphView for Journal<'_, V> {
    fn load(&self, id: RecordId) -> Option<Record> {
        self.view.load(id)
    }

    fn put(&mut self, record: Record) {
        self.touch(record.id());
        self.view.put(record);
    }

    fn remove(&mut self, id: RecordId) {
        self.touch(id);
        self.view.remove(id);
    }
}

/// Applies one mutation.
///
/// # Errors
///
/// `SchemaViolation` for undeclared names, wrong types, missing required
/// values or cross-entity links; `NotFound` when an update or link refers
/// to a missing record. The view may be partially modified on error; callers
/// undo through their journal.
pub(crate) fn apply(schema: &Schema, view: &mut impl GraphView, mutation: &Mutation) -> CoreResult<()> {
    match mutation {
        Mutation::Insert {
            id,
            entity,
            fields,
            links,
        } => insert(schema, view, *id, entity, fields, links),
        Mutation::Update { id, changes } => update(schema, view, *id, changes),
        Mutation::Link {
            id,
            relation,
            target,
        } => link(schema, view, *id, relation, *target),
        Mutation::Unlink {
            id,
            relation,
            target,
        } => unlink(schema, view, *id, relation, *target),
        Mutation::Delete { id } => delete(schema, view, *id),
    }
}

fn check_value(entity: &EntitySchema, name: &str, value: &FieldValue) -> CoreResult<()> {
    let def = entity.require_field(name)?;
    if !value.fits(def.ty) {
        return Err(CoreError::schema_violation(
            entity.name(),
            format!("field `{name}` expects {:?}, got {value:?}", def.ty),
        ));
    }
    if def.required && value.is_null() {
        return Err(CoreError::schema_violation(
            entity.name(),
            format!("required field `{name}` cannot be null"),
        ));
    }
    Ok(())
}

fn insert(
    schema: &Schema,
    view: &mut impl GraphView,
    id: RecordId,
    entity: &str,
    fields: &Fields,
    links: &Links,
) -> CoreResult<()> {
    let entity_schema = schema.entity(entity)?;
    if view.load(id).is_some() {
        return Err(CoreError::schema_violation(
            entity,
            format!("identity {id} is already in use"),
        ));
    }

    let mut record = Record::blank(id, entity_schema);
    for (name, value) in fields {
        check_value(entity_schema, name, value)?;
        record.set_value(name, value.clone());
    }
    if let Some(missing) = entity_schema
        .fields()
        .iter()
        .find(|def| def.required && record.value(&def.name).is_null())
    {
        return Err(CoreError::schema_violation(
            entity,
            format!("missing required field `{}`", missing.name),
        ));
    }
    for (relation, targets) in links {
        let def = entity_schema.require_relationship(relation)?;
        if def.cardinality == Cardinality::ToOne && targets.len() > 1 {
            return Err(CoreError::schema_violation(
                entity,
                format!("to-one relationship `{relation}` given {} targets", targets.len()),
            ));
        }
        if let Some(missing) = targets.iter().find(|t| view.load(**t).is_none()) {
            return Err(CoreError::schema_violation(
                entity,
                format!("relationship `{relation}` targets missing record {missing}"),
            ));
        }
    }

    view.put(record);
    for (relation, targets) in links {
        for target in targets {
            link(schema, view, id, relation, *target)?;
        }
    }
    Ok(())
}

fn update(
    schema: &Schema,
    view: &mut impl GraphView,
    id: RecordId,
    changes: &Fields,
) -> CoreResult<()> {
    let mut record = view.load(id).ok_or_else(|| CoreError::not_found(id))?;
    let entity_schema = schema.entity(record.entity())?;
    for (name, value) in changes {
        check_value(entity_schema, name, value)?;
        record.set_value(name, value.clone());
    }
    view.put(record);
    Ok(())
}

fn link(
    schema: &Schema,
    view: &mut impl GraphView,
    id: RecordId,
    relation: &str,
    target: RecordId,
) -> CoreResult<()> {
    let owner = view.load(id).ok_or_else(|| CoreError::not_found(id))?;
    let (forward, inverse) = schema.inverse_of(owner.entity(), relation)?;
    let target_record = view.load(target).ok_or_else(|| CoreError::not_found(target))?;
    if target_record.entity() != forward.target {
        return Err(CoreError::schema_violation(
            owner.entity(),
            format!(
                "relationship `{relation}` expects {}, got {}",
                forward.target,
                target_record.entity()
            ),
        ));
    }
    if owner.is_related(relation, target) {
        return Ok(());
    }

    // A to-one side holds a single edge: drop the old one first.
    if forward.cardinality == Cardinality::ToOne {
        if let Some(old) = owner.related_one(relation) {
            unlink(schema, view, id, relation, old)?;
        }
    }
    if inverse.cardinality == Cardinality::ToOne {
        if let Some(previous) = target_record.related_one(&inverse.name) {
            if previous != id {
                unlink(schema, view, previous, relation, target)?;
            }
        }
    }

    let mut owner = view.load(id).ok_or_else(|| CoreError::not_found(id))?;
    owner.add_link(relation, target);
    view.put(owner);
    let mut target_record = view.load(target).ok_or_else(|| CoreError::not_found(target))?;
    target_record.add_link(&inverse.name, id);
    view.put(target_record);
    Ok(())
}

fn unlink(
    schema: &Schema,
    view: &mut impl GraphView,
    id: RecordId,
    relation: &str,
    target: RecordId,
) -> CoreResult<()> {
    let mut owner = view.load(id).ok_or_else(|| CoreError::not_found(id))?;
    let (_, inverse) = schema.inverse_of(owner.entity(), relation)?;
    if owner.remove_link(relation, target) {
        view.put(owner);
    }
    if let Some(mut target_record) = view.load(target) {
        if target_record.remove_link(&inverse.name, id) {
            view.put(target_record);
        }
    }
    Ok(())
}

fn delete(schema: &Schema, view: &mut impl GraphView, id: RecordId) -> CoreResult<()> {
    let Some(record) = view.load(id) else {
        return Ok(());
    };
    let entity_schema = schema.entity(record.entity())?;
    view.remove(id);

    let mut cascade = Vec::new();
    for def in entity_schema.relationships() {
        for target in record.related(&def.name) {
            if let Some(mut target_record) = view.load(target) {
                if target_record.remove_link(&def.inverse, id) {
                    view.put(target_record);
                }
                if def.delete_rule == DeleteRule::Cascade {
                    cascade.push(target);
                }
            }
        }
    }
    for target in cascade {
        delete(schema, view, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, FieldType, RelationshipDef};
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MapView(BTreeMap<RecordId, Record>);

    impl GraphView for MapView {
        fn load(&self, id: RecordId) -> Option<Record> {
            self.0.get(&id).cloned()
        }
        fn put(&mut self, record: Record) {
            self.0.insert(record.id(), record);
        }
        fn remove(&mut self, id: RecordId) {
            self.0.remove(&id);
        }
    }

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntitySchema::new("Library")
                    .optional("name", FieldType::Text)
                    .relationship(
                        RelationshipDef::to_many("musics", "Music", "library")
                            .delete_rule(DeleteRule::Cascade),
                    ),
            )
            .entity(
                EntitySchema::new("Music")
                    .required("name", FieldType::Text)
                    .relationship(RelationshipDef::to_one("library", "Library", "musics")),
            )
            .build()
            .unwrap()
    }

    fn insert_into(view: &mut MapView, entity: &str, fields: &[(&str, &str)]) -> RecordId {
        let id = RecordId::new();
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
            .collect();
        apply(
            &schema(),
            view,
            &Mutation::Insert {
                id,
                entity: entity.to_string(),
                fields,
                links: Links::new(),
            },
        )
        .unwrap();
        id
    }

    fn link_mutation(id: RecordId, relation: &str, target: RecordId) -> Mutation {
        Mutation::Link {
            id,
            relation: relation.to_string(),
            target,
        }
    }

    #[test]
    fn insert_requires_required_fields() {
        let mut view = MapView::default();
        let err = apply(
            &schema(),
            &mut view,
            &Mutation::Insert {
                id: RecordId::new(),
                entity: "Music".into(),
                fields: Fields::new(),
                links: Links::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
        assert!(view.0.is_empty());
    }

    #[test]
    fn insert_with_missing_target_fails() {
        let mut view = MapView::default();
        let err = apply(
            &schema(),
            &mut view,
            &Mutation::Insert {
                id: RecordId::new(),
                entity: "Library".into(),
                fields: Fields::new(),
                links: Links::from([("musics".into(), [RecordId::new()].into())]),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
    }

    #[test]
    fn link_sets_both_sides() {
        let mut view = MapView::default();
        let library = insert_into(&mut view, "Library", &[("name", "Favorites")]);
        let music = insert_into(&mut view, "Music", &[("name", "Hello")]);

        apply(&schema(), &mut view, &link_mutation(library, "musics", music)).unwrap();

        assert!(view.load(library).unwrap().is_related("musics", music));
        assert_eq!(view.load(music).unwrap().related_one("library"), Some(library));
    }

    #[test]
    fn to_one_inverse_moves_the_edge() {
        let mut view = MapView::default();
        let first = insert_into(&mut view, "Library", &[]);
        let second = insert_into(&mut view, "Library", &[]);
        let music = insert_into(&mut view, "Music", &[("name", "Hello")]);

        apply(&schema(), &mut view, &link_mutation(first, "musics", music)).unwrap();
        apply(&schema(), &mut view, &link_mutation(second, "musics", music)).unwrap();

        assert!(view.load(first).unwrap().related("musics").is_empty());
        assert!(view.load(second).unwrap().is_related("musics", music));
        assert_eq!(view.load(music).unwrap().related_one("library"), Some(second));
    }

    #[test]
    fn linking_wrong_entity_is_rejected() {
        let mut view = MapView::default();
        let library = insert_into(&mut view, "Library", &[]);
        let other = insert_into(&mut view, "Library", &[]);
        let err = apply(&schema(), &mut view, &link_mutation(library, "musics", other)).unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
    }

    #[test]
    fn delete_nullifies_inverse() {
        let mut view = MapView::default();
        let library = insert_into(&mut view, "Library", &[]);
        let music = insert_into(&mut view, "Music", &[("name", "Hello")]);
        apply(&schema(), &mut view, &link_mutation(music, "library", library)).unwrap();

        apply(&schema(), &mut view, &Mutation::Delete { id: music }).unwrap();

        assert!(view.load(music).is_none());
        assert!(view.load(library).unwrap().related("musics").is_empty());
        // Second delete is a no-op.
        apply(&schema(), &mut view, &Mutation::Delete { id: music }).unwrap();
    }

    #[test]
    fn delete_cascades_when_declared() {
        let mut view = MapView::default();
        let library = insert_into(&mut view, "Library", &[]);
        let music = insert_into(&mut view, "Music", &[("name", "Hello")]);
        apply(&schema(), &mut view, &link_mutation(library, "musics", music)).unwrap();

        apply(&schema(), &mut view, &Mutation::Delete { id: library }).unwrap();

        assert!(view.0.is_empty());
    }

    #[test]
    fn journal_undo_restores_pre_images() {
        let mut view = MapView::default();
        let library = insert_into(&mut view, "Library", &[("name", "Old")]);
        let before = view.0.clone();

        let mut journal = Journal::new(&mut view);
        apply(
            &schema(),
            &mut journal,
            &Mutation::Update {
                id: library,
                changes: Fields::from([("name".into(), FieldValue::from("New"))]),
            },
        )
        .unwrap();
        let music = RecordId::new();
        apply(
            &schema(),
            &mut journal,
            &Mutation::Insert {
                id: music,
                entity: "Music".into(),
                fields: Fields::from([("name".into(), FieldValue::from("x"))]),
                links: Links::from([("library".into(), [library].into())]),
            },
        )
        .unwrap();
        assert_eq!(journal.writes().len(), 2);
        journal.undo();

        assert_eq!(view.0, before);
    }
}
