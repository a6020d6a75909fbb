//! Collects tentative writes for one optimistic layer.

use serde_json::{Map, Value};
use tracing::warn;

use crate::cache::store::Batch;
use crate::types::{Entity, PrimaryKey, Status};

#[derive(Debug, Clone)]
enum Op {
    Update {
        entity_type: String,
        primary_key: PrimaryKey,
        patch: Map<String, Value>,
    },
    Create(Entity),
    Delete {
        entity_type: String,
        primary_key: PrimaryKey,
    },
}

/// Describes the tentative effect of an action, applied in call order.
#[derive(Debug, Default)]
pub struct OptimisticBuilder {
    ops: Vec<Op>,
}

impl OptimisticBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow-merge `patch` over the entity's currently visible value.
    /// Entities not in the cache are left alone.
    pub fn update_object(
        &mut self,
        entity_type: impl Into<String>,
        primary_key: impl Into<PrimaryKey>,
        patch: Value,
    ) -> &mut Self {
        let patch = match patch {
            Value::Object(map) => map,
            other => {
                warn!(patch = %other, "optimistic patch must be an object; ignored");
                return self;
            }
        };
        self.ops.push(Op::Update {
            entity_type: entity_type.into(),
            primary_key: primary_key.into(),
            patch,
        });
        self
    }

    pub fn create_object(&mut self, entity: Entity) -> &mut Self {
        self.ops.push(Op::Create(entity));
        self
    }

    pub fn delete_object(
        &mut self,
        entity_type: impl Into<String>,
        primary_key: impl Into<PrimaryKey>,
    ) -> &mut Self {
        self.ops.push(Op::Delete {
            entity_type: entity_type.into(),
            primary_key: primary_key.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn apply(self, batch: &mut Batch<'_>) {
        for op in self.ops {
            match op {
                Op::Update {
                    entity_type,
                    primary_key,
                    patch,
                } => {
                    let key = batch.base_key(&entity_type, &primary_key);
                    let Some(entry) = batch.read(&key) else {
                        continue;
                    };
                    let Some(current) = entry.object() else {
                        continue;
                    };
                    let updated = current.with_patch(&patch);
                    batch.store_entity(updated, entry.status);
                }
                Op::Create(entity) => {
                    batch.store_entity(entity, Status::Loaded);
                }
                Op::Delete {
                    entity_type,
                    primary_key,
                } => batch.delete(&entity_type, &primary_key),
            }
        }
    }
}
