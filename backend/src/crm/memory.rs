use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::client::CrmClient;
use super::errors::CrmError;
use super::types::{CrmRecord, ObjectType, SearchFilter};

/// In-memory [`CrmClient`] for single-instance dev deployments and tests.
///
/// Individual operations can be made to fail via [`MemoryCrm::fail_on`] to
/// exercise compensation and warning paths.
#[derive(Default)]
pub struct MemoryCrm {
    objects: Mutex<HashMap<ObjectType, HashMap<String, HashMap<String, String>>>>,
    associations: Mutex<HashSet<(ObjectType, String, ObjectType, String)>>,
    next_id: AtomicU64,
    failing_ops: Mutex<HashSet<(&'static str, Option<ObjectType>)>>,
}

impl MemoryCrm {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    /// Make every subsequent `op` call fail with a 503 until cleared.
    /// Op names: get, create, update, delete, search, batch_read,
    /// batch_update, associate, associations_of, disassociate.
    pub fn fail_on(&self, op: &'static str) {
        self.failing_ops.lock().insert((op, None));
    }

    /// Like [`MemoryCrm::fail_on`], scoped to one object type.
    pub fn fail_on_type(&self, op: &'static str, ty: ObjectType) {
        self.failing_ops.lock().insert((op, Some(ty)));
    }

    pub fn clear_failures(&self) {
        self.failing_ops.lock().clear();
    }

    fn check(&self, op: &'static str, ty: ObjectType) -> Result<(), CrmError> {
        let failing = self.failing_ops.lock();
        if failing.contains(&(op, None)) || failing.contains(&(op, Some(ty))) {
            return Err(CrmError::api(503, format!("injected {op} failure")));
        }
        Ok(())
    }

    /// Seed an object with a known id (test setup).
    pub fn seed(&self, ty: ObjectType, id: &str, properties: HashMap<String, String>) {
        self.objects
            .lock()
            .entry(ty)
            .or_default()
            .insert(id.to_string(), properties);
    }

    pub fn prop(&self, ty: ObjectType, id: &str, name: &str) -> Option<String> {
        self.objects
            .lock()
            .get(&ty)?
            .get(id)?
            .get(name)
            .cloned()
    }

    pub fn is_associated(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
    ) -> bool {
        self.associations.lock().contains(&(
            from,
            from_id.to_string(),
            to,
            to_id.to_string(),
        ))
    }
}

#[async_trait]
impl CrmClient for MemoryCrm {
    async fn get(
        &self,
        ty: ObjectType,
        id: &str,
        _properties: &[&str],
    ) -> Result<Option<CrmRecord>, CrmError> {
        self.check("get", ty)?;
        Ok(self.objects.lock().get(&ty).and_then(|m| {
            m.get(id).map(|props| CrmRecord {
                id: id.to_string(),
                properties: props.clone(),
            })
        }))
    }

    async fn create(
        &self,
        ty: ObjectType,
        properties: HashMap<String, String>,
    ) -> Result<CrmRecord, CrmError> {
        self.check("create", ty)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        self.objects
            .lock()
            .entry(ty)
            .or_default()
            .insert(id.clone(), properties.clone());
        Ok(CrmRecord { id, properties })
    }

    async fn update(
        &self,
        ty: ObjectType,
        id: &str,
        properties: HashMap<String, String>,
    ) -> Result<CrmRecord, CrmError> {
        self.check("update", ty)?;
        let mut objects = self.objects.lock();
        let map = objects.entry(ty).or_default();

        let Some(existing) = map.get_mut(id) else {
            return Err(CrmError::api(404, format!("no {ty:?} object {id}")));
        };

        existing.extend(properties);
        Ok(CrmRecord {
            id: id.to_string(),
            properties: existing.clone(),
        })
    }

    async fn delete(&self, ty: ObjectType, id: &str) -> Result<(), CrmError> {
        self.check("delete", ty)?;
        self.objects.lock().entry(ty).or_default().remove(id);
        self.associations
            .lock()
            .retain(|(fty, fid, tty, tid)| {
                !((*fty == ty && fid == id) || (*tty == ty && tid == id))
            });
        Ok(())
    }

    async fn search(
        &self,
        ty: ObjectType,
        filters: &[SearchFilter],
        _properties: &[&str],
        limit: u32,
    ) -> Result<Vec<CrmRecord>, CrmError> {
        self.check("search", ty)?;
        let objects = self.objects.lock();
        let Some(map) = objects.get(&ty) else {
            return Ok(Vec::new());
        };

        let mut out: Vec<CrmRecord> = map
            .iter()
            .map(|(id, props)| CrmRecord {
                id: id.clone(),
                properties: props.clone(),
            })
            .filter(|r| filters.iter().all(|f| f.matches(r)))
            .collect();

        out.sort_by(|a, b| a.id.cmp(&b.id));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn batch_read(
        &self,
        ty: ObjectType,
        ids: &[String],
        _properties: &[&str],
    ) -> Result<Vec<CrmRecord>, CrmError> {
        self.check("batch_read", ty)?;
        let objects = self.objects.lock();
        let Some(map) = objects.get(&ty) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| {
                map.get(id).map(|props| CrmRecord {
                    id: id.clone(),
                    properties: props.clone(),
                })
            })
            .collect())
    }

    async fn batch_update(
        &self,
        ty: ObjectType,
        updates: Vec<(String, HashMap<String, String>)>,
    ) -> Result<(), CrmError> {
        self.check("batch_update", ty)?;
        let mut objects = self.objects.lock();
        let map = objects.entry(ty).or_default();

        for (id, props) in updates {
            let Some(existing) = map.get_mut(&id) else {
                return Err(CrmError::api(404, format!("no {ty:?} object {id}")));
            };
            existing.extend(props);
        }
        Ok(())
    }

    async fn associate(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
    ) -> Result<(), CrmError> {
        self.check("associate", from)?;
        self.associations.lock().insert((
            from,
            from_id.to_string(),
            to,
            to_id.to_string(),
        ));
        Ok(())
    }

    async fn associations_of(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
    ) -> Result<Vec<String>, CrmError> {
        self.check("associations_of", from)?;
        let mut out: Vec<String> = self
            .associations
            .lock()
            .iter()
            .filter(|(fty, fid, tty, _)| *fty == from && fid == from_id && *tty == to)
            .map(|(_, _, _, tid)| tid.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    async fn disassociate(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
    ) -> Result<(), CrmError> {
        self.check("disassociate", from)?;
        self.associations.lock().remove(&(
            from,
            from_id.to_string(),
            to,
            to_id.to_string(),
        ));
        Ok(())
    }
}
