//! In-memory reference implementation of [`ObjectStore`].
//!
//! State lives under one mutex; mutations apply in place and push their
//! inverse into the transaction's undo log, so rollback restores the exact
//! prior state. Good enough for the engine's tests and for any embedder
//! that does not need durability.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use mirror_fs::{Fid, LogicalPath};

use crate::object::{Branch, ContentAttr, ObjectAttr, ObjectId, ObjectType, Soid, StoreId};
use crate::store::{ObjectStore, Transaction};
use crate::{Error, Result};

#[derive(Clone)]
struct BranchRec {
    attr: ContentAttr,
    version: u64,
}

#[derive(Clone)]
struct ObjectRec {
    attr: ObjectAttr,
    children: BTreeMap<String, ObjectId>,
    contents: BTreeMap<u32, BranchRec>,
}

impl ObjectRec {
    fn new(attr: ObjectAttr) -> Self {
        Self {
            attr,
            children: BTreeMap::new(),
            contents: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<ObjectId, ObjectRec>,
    by_fid: HashMap<Fid, ObjectId>,
}

#[derive(Default)]
struct State {
    stores: HashMap<StoreId, StoreState>,
}

impl State {
    fn store(&self, store: StoreId) -> Result<&StoreState> {
        self.stores
            .get(&store)
            .ok_or(Error::StoreNotFound { store: store.0 })
    }

    fn store_mut(&mut self, store: StoreId) -> Result<&mut StoreState> {
        self.stores
            .get_mut(&store)
            .ok_or(Error::StoreNotFound { store: store.0 })
    }

    fn rec(&self, soid: Soid) -> Result<&ObjectRec> {
        self.store(soid.store)?
            .objects
            .get(&soid.oid)
            .ok_or(Error::ObjectNotFound { soid })
    }
}

/// In-memory object store with undo-log transactions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryStore {
    fn begin(&self) -> Transaction {
        Transaction::new()
    }

    fn has_store(&self, store: StoreId) -> bool {
        self.state.lock().stores.contains_key(&store)
    }

    fn list_stores(&self) -> Vec<StoreId> {
        let mut stores: Vec<_> = self.state.lock().stores.keys().copied().collect();
        stores.sort();
        stores
    }

    fn resolve(&self, store: StoreId, path: &LogicalPath) -> Option<Soid> {
        let state = self.state.lock();
        let store_state = state.stores.get(&store)?;

        let mut oid = ObjectId::ROOT;
        for component in path.components() {
            let rec = store_state.objects.get(&oid)?;
            oid = *rec.children.get(component)?;
        }
        Some(Soid::new(store, oid))
    }

    fn attributes(&self, soid: Soid) -> Result<ObjectAttr> {
        Ok(self.state.lock().rec(soid)?.attr.clone())
    }

    fn child(&self, parent: Soid, name: &str) -> Option<Soid> {
        let state = self.state.lock();
        let rec = state.rec(parent).ok()?;
        rec.children
            .get(name)
            .map(|&oid| Soid::new(parent.store, oid))
    }

    fn children(&self, parent: Soid) -> Result<Vec<(String, Soid)>> {
        let state = self.state.lock();
        let rec = state.rec(parent)?;
        if !rec.attr.otype.is_dir_like() && !parent.is_root() {
            return Err(Error::NotAContainer { soid: parent });
        }
        Ok(rec
            .children
            .iter()
            .map(|(name, &oid)| (name.clone(), Soid::new(parent.store, oid)))
            .collect())
    }

    fn object_by_fid(&self, store: StoreId, fid: Fid) -> Option<Soid> {
        let state = self.state.lock();
        let store_state = state.stores.get(&store)?;
        store_state
            .by_fid
            .get(&fid)
            .map(|&oid| Soid::new(store, oid))
    }

    fn path_of(&self, soid: Soid) -> Result<LogicalPath> {
        let state = self.state.lock();
        let store_state = state.store(soid.store)?;

        let mut names = Vec::new();
        let mut oid = soid.oid;
        while oid != ObjectId::ROOT {
            let rec = store_state
                .objects
                .get(&oid)
                .ok_or(Error::ObjectNotFound { soid })?;
            names.push(rec.attr.name.clone());
            oid = rec.attr.parent.oid;
        }

        let mut path = LogicalPath::root();
        for name in names.iter().rev() {
            path = path.join(name);
        }
        Ok(path)
    }

    fn content(&self, soid: Soid, branch: Branch) -> Option<ContentAttr> {
        let state = self.state.lock();
        let rec = state.rec(soid).ok()?;
        rec.contents.get(&branch.0).map(|b| b.attr.clone())
    }

    fn version(&self, soid: Soid, branch: Branch) -> u64 {
        let state = self.state.lock();
        state
            .rec(soid)
            .ok()
            .and_then(|rec| rec.contents.get(&branch.0))
            .map(|b| b.version)
            .unwrap_or(0)
    }

    fn create_store(&self, tx: &mut Transaction, store: StoreId) -> Result<()> {
        let mut state = self.state.lock();
        if state.stores.contains_key(&store) {
            return Err(Error::StoreExists { store: store.0 });
        }

        let root_attr = ObjectAttr {
            otype: ObjectType::Dir,
            parent: Soid::root(store),
            name: String::new(),
            expelled: false,
            non_representable: false,
            fid: None,
        };
        let mut store_state = StoreState::default();
        store_state
            .objects
            .insert(ObjectId::ROOT, ObjectRec::new(root_attr));
        state.stores.insert(store, store_state);
        drop(state);

        trace!(%store, "created store");
        let shared = self.state.clone();
        tx.push_undo(move || {
            shared.lock().stores.remove(&store);
        });
        Ok(())
    }

    fn remove_store(&self, tx: &mut Transaction, store: StoreId) -> Result<()> {
        let mut state = self.state.lock();
        let removed = state
            .stores
            .remove(&store)
            .ok_or(Error::StoreNotFound { store: store.0 })?;
        drop(state);

        trace!(%store, "removed store");
        let shared = self.state.clone();
        tx.push_undo(move || {
            shared.lock().stores.insert(store, removed);
        });
        Ok(())
    }

    fn create_object(
        &self,
        tx: &mut Transaction,
        parent: Soid,
        name: &str,
        otype: ObjectType,
        fid: Option<Fid>,
    ) -> Result<Soid> {
        let mut state = self.state.lock();
        let store_state = state.store_mut(parent.store)?;

        let parent_rec = store_state
            .objects
            .get(&parent.oid)
            .ok_or(Error::ObjectNotFound { soid: parent })?;
        if !parent_rec.attr.otype.is_dir_like() && !parent.is_root() {
            return Err(Error::NotAContainer { soid: parent });
        }
        if parent_rec.children.contains_key(name) {
            return Err(Error::NameTaken {
                parent,
                name: name.to_string(),
            });
        }
        if let Some(f) = fid
            && store_state.by_fid.contains_key(&f)
        {
            return Err(Error::FidTaken { fid: f });
        }

        let oid = ObjectId::generate();
        let soid = Soid::new(parent.store, oid);
        let attr = ObjectAttr {
            otype,
            parent,
            name: name.to_string(),
            expelled: false,
            non_representable: false,
            fid,
        };
        store_state.objects.insert(oid, ObjectRec::new(attr));
        store_state
            .objects
            .get_mut(&parent.oid)
            .expect("parent checked above")
            .children
            .insert(name.to_string(), oid);
        if let Some(f) = fid {
            store_state.by_fid.insert(f, oid);
        }
        drop(state);

        trace!(%soid, name, ?otype, "created object");
        let shared = self.state.clone();
        let name = name.to_string();
        tx.push_undo(move || {
            let mut state = shared.lock();
            if let Some(store_state) = state.stores.get_mut(&parent.store) {
                store_state.objects.remove(&oid);
                if let Some(f) = fid {
                    store_state.by_fid.remove(&f);
                }
                if let Some(parent_rec) = store_state.objects.get_mut(&parent.oid) {
                    parent_rec.children.remove(&name);
                }
            }
        });
        Ok(soid)
    }

    fn move_object(
        &self,
        tx: &mut Transaction,
        soid: Soid,
        new_parent: Soid,
        new_name: &str,
    ) -> Result<()> {
        if new_parent.store != soid.store {
            return Err(Error::CrossStoreMove { soid });
        }
        if soid.is_root() {
            return Err(Error::CannotMoveRoot { soid });
        }

        let mut state = self.state.lock();
        let store_state = state.store_mut(soid.store)?;

        let new_parent_rec = store_state
            .objects
            .get(&new_parent.oid)
            .ok_or(Error::ObjectNotFound { soid: new_parent })?;
        if !new_parent_rec.attr.otype.is_dir_like() && !new_parent.is_root() {
            return Err(Error::NotAContainer { soid: new_parent });
        }
        if let Some(&taken) = new_parent_rec.children.get(new_name)
            && taken != soid.oid
        {
            return Err(Error::NameTaken {
                parent: new_parent,
                name: new_name.to_string(),
            });
        }

        let rec = store_state
            .objects
            .get(&soid.oid)
            .ok_or(Error::ObjectNotFound { soid })?;
        let old_parent = rec.attr.parent;
        let old_name = rec.attr.name.clone();

        if old_parent == new_parent && old_name == new_name {
            return Ok(());
        }

        if let Some(old_parent_rec) = store_state.objects.get_mut(&old_parent.oid) {
            old_parent_rec.children.remove(&old_name);
        }
        store_state
            .objects
            .get_mut(&new_parent.oid)
            .expect("checked above")
            .children
            .insert(new_name.to_string(), soid.oid);
        let rec = store_state
            .objects
            .get_mut(&soid.oid)
            .expect("checked above");
        rec.attr.parent = new_parent;
        rec.attr.name = new_name.to_string();
        drop(state);

        trace!(%soid, from = %old_name, to = new_name, "moved object");
        let shared = self.state.clone();
        let new_name = new_name.to_string();
        tx.push_undo(move || {
            let mut state = shared.lock();
            if let Some(store_state) = state.stores.get_mut(&soid.store) {
                if let Some(new_parent_rec) = store_state.objects.get_mut(&new_parent.oid) {
                    new_parent_rec.children.remove(&new_name);
                }
                if let Some(old_parent_rec) = store_state.objects.get_mut(&old_parent.oid) {
                    old_parent_rec.children.insert(old_name.clone(), soid.oid);
                }
                if let Some(rec) = store_state.objects.get_mut(&soid.oid) {
                    rec.attr.parent = old_parent;
                    rec.attr.name = old_name.clone();
                }
            }
        });
        Ok(())
    }

    fn set_fid(&self, tx: &mut Transaction, soid: Soid, fid: Option<Fid>) -> Result<()> {
        let mut state = self.state.lock();
        let store_state = state.store_mut(soid.store)?;

        if let Some(f) = fid
            && let Some(&other) = store_state.by_fid.get(&f)
            && other != soid.oid
        {
            return Err(Error::FidTaken { fid: f });
        }

        let rec = store_state
            .objects
            .get(&soid.oid)
            .ok_or(Error::ObjectNotFound { soid })?;
        let old = rec.attr.fid;
        if old == fid {
            return Ok(());
        }

        if let Some(f) = old {
            store_state.by_fid.remove(&f);
        }
        if let Some(f) = fid {
            store_state.by_fid.insert(f, soid.oid);
        }
        store_state
            .objects
            .get_mut(&soid.oid)
            .expect("checked above")
            .attr
            .fid = fid;
        drop(state);

        let shared = self.state.clone();
        tx.push_undo(move || {
            let mut state = shared.lock();
            if let Some(store_state) = state.stores.get_mut(&soid.store) {
                if let Some(f) = fid {
                    store_state.by_fid.remove(&f);
                }
                if let Some(f) = old {
                    store_state.by_fid.insert(f, soid.oid);
                }
                if let Some(rec) = store_state.objects.get_mut(&soid.oid) {
                    rec.attr.fid = old;
                }
            }
        });
        Ok(())
    }

    fn set_content(
        &self,
        tx: &mut Transaction,
        soid: Soid,
        branch: Branch,
        attr: ContentAttr,
        bump: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let store_state = state.store_mut(soid.store)?;
        let rec = store_state
            .objects
            .get_mut(&soid.oid)
            .ok_or(Error::ObjectNotFound { soid })?;

        let old = rec.contents.get(&branch.0).cloned();
        // A new branch starts at version 1; bumps increment from there.
        let version = match &old {
            Some(existing) => existing.version + u64::from(bump),
            None => 1,
        };
        rec.contents.insert(branch.0, BranchRec { attr, version });
        drop(state);

        let shared = self.state.clone();
        tx.push_undo(move || {
            let mut state = shared.lock();
            if let Some(store_state) = state.stores.get_mut(&soid.store)
                && let Some(rec) = store_state.objects.get_mut(&soid.oid)
            {
                match old.clone() {
                    Some(previous) => rec.contents.insert(branch.0, previous),
                    None => rec.contents.remove(&branch.0),
                };
            }
        });
        Ok(())
    }

    fn set_expelled(&self, tx: &mut Transaction, soid: Soid, expelled: bool) -> Result<()> {
        self.set_flag(tx, soid, expelled, Flag::Expelled)
    }

    fn set_non_representable(&self, tx: &mut Transaction, soid: Soid, flag: bool) -> Result<()> {
        self.set_flag(tx, soid, flag, Flag::NonRepresentable)
    }

    fn remove_object(&self, tx: &mut Transaction, soid: Soid) -> Result<()> {
        if soid.is_root() {
            return Err(Error::CannotRemoveRoot { soid });
        }

        let mut state = self.state.lock();
        let store_state = state.store_mut(soid.store)?;

        let top_rec = store_state
            .objects
            .get(&soid.oid)
            .ok_or(Error::ObjectNotFound { soid })?;
        let top_name = top_rec.attr.name.clone();
        let top_parent = top_rec.attr.parent;

        // Children-first removal order so undo can reinsert parents first.
        let mut order = Vec::new();
        let mut stack = vec![soid.oid];
        while let Some(oid) = stack.pop() {
            if let Some(rec) = store_state.objects.get(&oid) {
                stack.extend(rec.children.values().copied());
            }
            order.push(oid);
        }
        order.reverse();

        let mut removed = Vec::with_capacity(order.len());
        for oid in order {
            if let Some(rec) = store_state.objects.remove(&oid) {
                if let Some(f) = rec.attr.fid {
                    store_state.by_fid.remove(&f);
                }
                removed.push((oid, rec));
            }
        }
        if let Some(parent_rec) = store_state.objects.get_mut(&top_parent.oid) {
            parent_rec.children.remove(&top_name);
        }
        drop(state);

        trace!(%soid, subtree = removed.len(), "removed object");
        let shared = self.state.clone();
        tx.push_undo(move || {
            let mut state = shared.lock();
            if let Some(store_state) = state.stores.get_mut(&soid.store) {
                for (oid, rec) in removed.into_iter().rev() {
                    if let Some(f) = rec.attr.fid {
                        store_state.by_fid.insert(f, oid);
                    }
                    store_state.objects.insert(oid, rec);
                }
                if let Some(parent_rec) = store_state.objects.get_mut(&top_parent.oid) {
                    parent_rec.children.insert(top_name, soid.oid);
                }
            }
        });
        Ok(())
    }
}

/// Which boolean attribute [`MemoryStore::set_flag`] targets.
#[derive(Debug, Clone, Copy)]
enum Flag {
    Expelled,
    NonRepresentable,
}

impl Flag {
    fn read(self, attr: &ObjectAttr) -> bool {
        match self {
            Self::Expelled => attr.expelled,
            Self::NonRepresentable => attr.non_representable,
        }
    }

    fn write(self, attr: &mut ObjectAttr, value: bool) {
        match self {
            Self::Expelled => attr.expelled = value,
            Self::NonRepresentable => attr.non_representable = value,
        }
    }
}

impl MemoryStore {
    fn set_flag(&self, tx: &mut Transaction, soid: Soid, value: bool, which: Flag) -> Result<()> {
        let mut state = self.state.lock();
        let store_state = state.store_mut(soid.store)?;
        let rec = store_state
            .objects
            .get_mut(&soid.oid)
            .ok_or(Error::ObjectNotFound { soid })?;

        let old = which.read(&rec.attr);
        if old == value {
            return Ok(());
        }
        which.write(&mut rec.attr, value);
        drop(state);

        let shared = self.state.clone();
        tx.push_undo(move || {
            let mut state = shared.lock();
            if let Some(store_state) = state.stores.get_mut(&soid.store)
                && let Some(rec) = store_state.objects.get_mut(&soid.oid)
            {
                which.write(&mut rec.attr, old);
            }
        });
        Ok(())
    }
}
