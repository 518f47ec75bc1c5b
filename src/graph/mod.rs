//! Graph store: entities, relationships, and the indices over them.
//!
//! The store is an arena — entities and relationships live in dense vectors
//! addressed by their sequential ids, and relationships hold id pairs rather
//! than references. The scheduler owns the store exclusively for the duration
//! of a run; evaluators and the enforcer receive a borrow only during their
//! turn in a rule firing.
//!
//! All secondary indices use `BTreeMap`/sorted vectors so iteration order is
//! deterministic; a fixed seed must reproduce a run bit-for-bit.

pub mod analytics;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::ident::{EntityId, IdAllocator, RelationshipId};
use crate::schema::WorldSchema;

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Value carried by a tag on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl TagValue {
    /// Truthiness used by `has_tag` filters with no expected value:
    /// `false` and `0` count as absent.
    pub fn is_truthy(&self) -> bool {
        match self {
            TagValue::Bool(b) => *b,
            TagValue::Number(n) => *n != 0.0,
            TagValue::String(s) => !s.is_empty(),
        }
    }
}

/// Ordered significance tier of an entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Prominence {
    #[default]
    Forgotten,
    Marginal,
    Recognized,
    Renowned,
    Mythic,
}

impl Prominence {
    pub const ALL: [Prominence; 5] = [
        Prominence::Forgotten,
        Prominence::Marginal,
        Prominence::Recognized,
        Prominence::Renowned,
        Prominence::Mythic,
    ];

    /// Zero-based index of this level in the ordering.
    pub fn index(self) -> usize {
        match self {
            Prominence::Forgotten => 0,
            Prominence::Marginal => 1,
            Prominence::Recognized => 2,
            Prominence::Renowned => 3,
            Prominence::Mythic => 4,
        }
    }

    /// Move `steps` levels up (positive) or down (negative), clamped to the
    /// ends of the scale. Ordinary transitions pass ±1; mutations that jump
    /// multiple levels say so explicitly in the rule document.
    pub fn stepped(self, steps: i32) -> Prominence {
        let idx = (self.index() as i32 + steps).clamp(0, 4) as usize;
        Prominence::ALL[idx]
    }

    pub fn name(self) -> &'static str {
        match self {
            Prominence::Forgotten => "forgotten",
            Prominence::Marginal => "marginal",
            Prominence::Recognized => "recognized",
            Prominence::Renowned => "renowned",
            Prominence::Mythic => "mythic",
        }
    }
}

// ---------------------------------------------------------------------------
// Entities and relationships
// ---------------------------------------------------------------------------

/// A world entity.
///
/// Kind, subtype, status and culture are registry-validated strings — the
/// schema is externally authored, so these vocabularies are open at compile
/// time and closed at validation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub name: String,
    pub status: String,
    pub prominence: Prominence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, TagValue>,
    /// Kind-specific numeric attributes (population, territory, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
    pub created_at_tick: u64,
    pub updated_at_tick: u64,
    /// Optional spatial placement; the z component is 0 for 2D worlds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<[f64; 3]>,
}

/// A relationship between two entities. Archived relationships are
/// soft-deleted: they stay in the arena but are excluded from queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub kind: String,
    pub src: EntityId,
    pub dst: EntityId,
    pub strength: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at_tick: u64,
    #[serde(default)]
    pub archived: bool,
}

/// Specification for a new entity, passed to [`GraphStore::create_entity`].
#[derive(Debug, Clone, Default)]
pub struct NewEntity {
    pub kind: String,
    pub subtype: Option<String>,
    pub name: String,
    /// `None` selects the kind's default status.
    pub status: Option<String>,
    pub prominence: Prominence,
    pub culture: Option<String>,
    pub tags: BTreeMap<String, TagValue>,
    pub attributes: BTreeMap<String, f64>,
    pub placement: Option<[f64; 3]>,
}

// ---------------------------------------------------------------------------
// Graph store
// ---------------------------------------------------------------------------

/// Arena-backed entity/relationship store with deterministic indices.
#[derive(Debug)]
pub struct GraphStore {
    schema: WorldSchema,
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
    entity_ids: IdAllocator,
    relationship_ids: IdAllocator,
    /// kind -> entity ids in creation order.
    kind_index: BTreeMap<String, Vec<EntityId>>,
    /// entity -> relationship ids where the entity is src (outgoing).
    out_edges: BTreeMap<EntityId, Vec<RelationshipId>>,
    /// entity -> relationship ids where the entity is dst (incoming).
    in_edges: BTreeMap<EntityId, Vec<RelationshipId>>,
}

impl GraphStore {
    /// Create an empty store owning a copy of the schema it enforces.
    pub fn new(schema: WorldSchema) -> Self {
        Self {
            schema,
            entities: Vec::new(),
            relationships: Vec::new(),
            entity_ids: IdAllocator::new(),
            relationship_ids: IdAllocator::new(),
            kind_index: BTreeMap::new(),
            out_edges: BTreeMap::new(),
            in_edges: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &WorldSchema {
        &self.schema
    }

    // -----------------------------------------------------------------------
    // Entity lifecycle
    // -----------------------------------------------------------------------

    /// Create an entity, validating status membership and tag conflicts.
    pub fn create_entity(&mut self, spec: NewEntity, tick: u64) -> Result<EntityId, GraphError> {
        let status = match &spec.status {
            Some(s) => {
                let kind_def = self.schema.entity_kind(&spec.kind);
                match kind_def {
                    Some(def) if def.has_status(s) => s.clone(),
                    _ => {
                        return Err(GraphError::InvalidStatus {
                            kind: spec.kind.clone(),
                            status: s.clone(),
                        });
                    }
                }
            }
            None => self
                .schema
                .entity_kind(&spec.kind)
                .map(|def| def.default_status().to_string())
                .unwrap_or_else(|| "active".to_string()),
        };

        for (a, value) in &spec.tags {
            if !value.is_truthy() {
                continue;
            }
            for (b, other) in &spec.tags {
                if a < b && other.is_truthy() && self.schema.tags_conflict(a, b) {
                    return Err(GraphError::TagConflict {
                        a: a.clone(),
                        b: b.clone(),
                    });
                }
            }
        }

        let id = EntityId::new(self.entity_ids.next_raw()?.get()).ok_or(GraphError::IdsExhausted)?;
        let entity = Entity {
            id,
            kind: spec.kind.clone(),
            subtype: spec.subtype,
            name: spec.name,
            status,
            prominence: spec.prominence,
            culture: spec.culture,
            tags: spec.tags,
            attributes: spec.attributes,
            created_at_tick: tick,
            updated_at_tick: tick,
            placement: spec.placement,
        };
        self.entities.push(entity);
        self.kind_index.entry(spec.kind).or_default().push(id);
        Ok(id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.get() as usize - 1)
    }

    fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, GraphError> {
        let raw = id.get();
        self.entities
            .get_mut(raw as usize - 1)
            .ok_or(GraphError::EntityNotFound { entity_id: raw })
    }

    /// All entities in creation order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entity ids of a given kind, in creation order.
    pub fn entities_of_kind(&self, kind: &str) -> &[EntityId] {
        self.kind_index.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Running count for a (kind, subtype) pair; `None` subtype counts the kind.
    pub fn count_kind_subtype(&self, kind: &str, subtype: Option<&str>) -> usize {
        match subtype {
            None => self.entities_of_kind(kind).len(),
            Some(sub) => self
                .entities_of_kind(kind)
                .iter()
                .filter(|id| {
                    self.entity(**id)
                        .and_then(|e| e.subtype.as_deref())
                        .is_some_and(|s| s == sub)
                })
                .count(),
        }
    }

    // -----------------------------------------------------------------------
    // Entity mutation (index-maintaining)
    // -----------------------------------------------------------------------

    /// Set a tag, enforcing declared conflicts against the entity's current tags.
    pub fn set_tag(
        &mut self,
        id: EntityId,
        name: &str,
        value: TagValue,
        tick: u64,
    ) -> Result<(), GraphError> {
        if value.is_truthy() {
            let current: Vec<String> = self
                .entity(id)
                .ok_or(GraphError::EntityNotFound { entity_id: id.get() })?
                .tags
                .iter()
                .filter(|(k, v)| k.as_str() != name && v.is_truthy())
                .map(|(k, _)| k.clone())
                .collect();
            for existing in current {
                if self.schema.tags_conflict(name, &existing) {
                    return Err(GraphError::TagConflict {
                        a: name.to_string(),
                        b: existing,
                    });
                }
            }
        }
        let entity = self.entity_mut(id)?;
        entity.tags.insert(name.to_string(), value);
        entity.updated_at_tick = tick;
        Ok(())
    }

    pub fn remove_tag(&mut self, id: EntityId, name: &str, tick: u64) -> Result<(), GraphError> {
        let entity = self.entity_mut(id)?;
        entity.tags.remove(name);
        entity.updated_at_tick = tick;
        Ok(())
    }

    /// Change status, validating membership in the kind's registered set.
    pub fn set_status(&mut self, id: EntityId, status: &str, tick: u64) -> Result<(), GraphError> {
        let kind = self
            .entity(id)
            .ok_or(GraphError::EntityNotFound { entity_id: id.get() })?
            .kind
            .clone();
        let valid = self
            .schema
            .entity_kind(&kind)
            .is_some_and(|def| def.has_status(status));
        if !valid {
            return Err(GraphError::InvalidStatus {
                kind,
                status: status.to_string(),
            });
        }
        let entity = self.entity_mut(id)?;
        entity.status = status.to_string();
        entity.updated_at_tick = tick;
        Ok(())
    }

    /// Step prominence by the given number of levels, clamped to the scale.
    pub fn adjust_prominence(
        &mut self,
        id: EntityId,
        steps: i32,
        tick: u64,
    ) -> Result<Prominence, GraphError> {
        let entity = self.entity_mut(id)?;
        entity.prominence = entity.prominence.stepped(steps);
        entity.updated_at_tick = tick;
        Ok(entity.prominence)
    }

    /// Explicit prominence jump (rules that bypass the one-level rule say so).
    pub fn set_prominence(
        &mut self,
        id: EntityId,
        prominence: Prominence,
        tick: u64,
    ) -> Result<(), GraphError> {
        let entity = self.entity_mut(id)?;
        entity.prominence = prominence;
        entity.updated_at_tick = tick;
        Ok(())
    }

    pub fn adjust_attribute(
        &mut self,
        id: EntityId,
        name: &str,
        delta: f64,
        tick: u64,
    ) -> Result<(), GraphError> {
        let entity = self.entity_mut(id)?;
        *entity.attributes.entry(name.to_string()).or_insert(0.0) += delta;
        entity.updated_at_tick = tick;
        Ok(())
    }

    pub fn set_placement(
        &mut self,
        id: EntityId,
        placement: [f64; 3],
        tick: u64,
    ) -> Result<(), GraphError> {
        let entity = self.entity_mut(id)?;
        entity.placement = Some(placement);
        entity.updated_at_tick = tick;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Relationships
    // -----------------------------------------------------------------------

    /// Create a relationship, validating endpoint kinds against the registry.
    /// Strength is clamped to `[0, 1]`.
    pub fn create_relationship(
        &mut self,
        kind: &str,
        src: EntityId,
        dst: EntityId,
        strength: f64,
        category: Option<String>,
        tick: u64,
    ) -> Result<RelationshipId, GraphError> {
        let src_kind = self
            .entity(src)
            .ok_or(GraphError::EntityNotFound { entity_id: src.get() })?
            .kind
            .clone();
        let dst_kind = self
            .entity(dst)
            .ok_or(GraphError::EntityNotFound { entity_id: dst.get() })?
            .kind
            .clone();

        let allowed = self
            .schema
            .relationship_kind(kind)
            .is_some_and(|def| def.allows(&src_kind, &dst_kind));
        if !allowed {
            return Err(GraphError::ConstraintViolation {
                kind: kind.to_string(),
                src_kind,
                dst_kind,
            });
        }

        let id = RelationshipId::new(self.relationship_ids.next_raw()?.get())
            .ok_or(GraphError::IdsExhausted)?;
        self.relationships.push(Relationship {
            id,
            kind: kind.to_string(),
            src,
            dst,
            strength: strength.clamp(0.0, 1.0),
            category,
            created_at_tick: tick,
            archived: false,
        });
        self.out_edges.entry(src).or_default().push(id);
        self.in_edges.entry(dst).or_default().push(id);
        Ok(id)
    }

    pub fn relationship(&self, id: RelationshipId) -> Option<&Relationship> {
        self.relationships.get(id.get() as usize - 1)
    }

    pub fn archive_relationship(&mut self, id: RelationshipId) -> Result<(), GraphError> {
        let raw = id.get();
        let rel = self
            .relationships
            .get_mut(raw as usize - 1)
            .ok_or(GraphError::RelationshipNotFound {
                relationship_id: raw,
            })?;
        rel.archived = true;
        Ok(())
    }

    pub fn adjust_relationship_strength(
        &mut self,
        id: RelationshipId,
        delta: f64,
    ) -> Result<f64, GraphError> {
        let raw = id.get();
        let rel = self
            .relationships
            .get_mut(raw as usize - 1)
            .ok_or(GraphError::RelationshipNotFound {
                relationship_id: raw,
            })?;
        rel.strength = (rel.strength + delta).clamp(0.0, 1.0);
        Ok(rel.strength)
    }

    /// All relationships including archived ones (the export wants both).
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Non-archived relationship count.
    pub fn relationship_count(&self) -> usize {
        self.relationships.iter().filter(|r| !r.archived).count()
    }

    /// Non-archived relationships touching `entity`, honoring symmetry:
    /// for symmetric kinds both directions are returned, for directed kinds
    /// only the requested orientation matters to callers (both are returned
    /// and callers inspect src/dst).
    pub fn relationships_of(&self, entity: EntityId) -> Vec<&Relationship> {
        let mut out: Vec<&Relationship> = Vec::new();
        if let Some(ids) = self.out_edges.get(&entity) {
            out.extend(ids.iter().filter_map(|id| self.relationship(*id)));
        }
        if let Some(ids) = self.in_edges.get(&entity) {
            out.extend(ids.iter().filter_map(|id| self.relationship(*id)));
        }
        out.retain(|r| !r.archived);
        out
    }

    /// Ids of entities related to `entity`, optionally restricted to a
    /// relationship kind. Symmetric kinds are queried undirected; directed
    /// kinds are also traversed in both directions here because "related"
    /// is a neighborhood query, not an orientation query.
    pub fn related_entities(&self, entity: EntityId, kind: Option<&str>) -> Vec<EntityId> {
        let mut out = Vec::new();
        for rel in self.relationships_of(entity) {
            if let Some(k) = kind {
                if rel.kind != k {
                    continue;
                }
            }
            let other = if rel.src == entity { rel.dst } else { rel.src };
            if !out.contains(&other) {
                out.push(other);
            }
        }
        out
    }

    /// Whether a non-archived relationship of `kind` (or any kind) exists
    /// between the two entities, in either direction.
    pub fn are_related(&self, a: EntityId, b: EntityId, kind: Option<&str>) -> bool {
        self.relationships_of(a).iter().any(|r| {
            let touches = (r.src == a && r.dst == b) || (r.src == b && r.dst == a);
            touches && kind.is_none_or(|k| r.kind == k)
        })
    }

    /// Entities reachable from `start` within `max_hops` relationship hops,
    /// optionally restricted to one relationship kind. Excludes `start`.
    /// Breadth-first, deterministic order.
    pub fn reachable_within(
        &self,
        start: EntityId,
        max_hops: usize,
        kind: Option<&str>,
    ) -> Vec<EntityId> {
        let mut visited = vec![start];
        let mut frontier = vec![start];
        let mut out = Vec::new();
        for _ in 0..max_hops {
            let mut next = Vec::new();
            for &node in &frontier {
                for neighbor in self.related_entities(node, kind) {
                    if !visited.contains(&neighbor) {
                        visited.push(neighbor);
                        next.push(neighbor);
                        out.push(neighbor);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        out
    }
}
