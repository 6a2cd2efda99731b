//! Per-tenant device store: one sled database holding the Signal keys,
//! app-state sync data and the device record for a single linked device.

use std::path::Path;

use {
    async_trait::async_trait,
    serde::{Serialize, de::DeserializeOwned},
    wacore::{
        appstate::hash::HashState,
        store::{
            Device,
            error::{Result as StoreResult, StoreError},
            traits::{
                AppStateMutationMAC, AppSyncStore, DeviceListRecord, DeviceStore,
                LidPnMappingEntry, ProtocolStore, SignalStore,
            },
        },
    },
    wacore_binary::jid::Jid,
    waproto::whatsapp as wa,
    wagate_common::{Error, Result},
};

const IDENTITIES: &str = "identities";
const SESSIONS: &str = "sessions";
const PREKEYS: &str = "prekeys";
const SIGNED_PREKEYS: &str = "signed_prekeys";
const SENDER_KEYS: &str = "sender_keys";
const SYNC_KEYS: &str = "sync_keys";
const VERSIONS: &str = "app_state_versions";
const MUTATION_MACS: &str = "mutation_macs";
const SKDM: &str = "skdm_recipients";
const LID_BY_LID: &str = "lid_mappings";
const LID_BY_PN: &str = "pn_mappings";
const BASE_KEYS: &str = "base_keys";
const DEVICE_LISTS: &str = "device_lists";
const FORGET_MARKS: &str = "forget_marks";
const DEVICE: &str = "device";
const DEVICE_KEY: &[u8] = b"self";

const ALL_TREES: [&str; 15] = [
    IDENTITIES,
    SESSIONS,
    PREKEYS,
    SIGNED_PREKEYS,
    SENDER_KEYS,
    SYNC_KEYS,
    VERSIONS,
    MUTATION_MACS,
    SKDM,
    LID_BY_LID,
    LID_BY_PN,
    BASE_KEYS,
    DEVICE_LISTS,
    FORGET_MARKS,
    DEVICE,
];

fn db_err(e: sled::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn codec_err(e: postcard::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

/// Keys within a tree that belong to one collection, e.g. all MACs of one
/// app-state collection.
fn scoped(scope: &str, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(scope.len() + 1 + key.len());
    out.extend_from_slice(scope.as_bytes());
    out.push(0);
    out.extend_from_slice(key);
    out
}

pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(|e| {
            Error::transport(format!("cannot open device store {}: {e}", path.display()))
        })?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> StoreResult<sled::Tree> {
        self.db.open_tree(name).map_err(db_err)
    }

    fn get_raw(&self, tree: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.tree(tree)?.get(key).map_err(db_err)?.map(|v| v.to_vec()))
    }

    fn put_raw(&self, tree: &str, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.tree(tree)?.insert(key, value).map_err(db_err)?;
        Ok(())
    }

    fn remove(&self, tree: &str, key: &[u8]) -> StoreResult<()> {
        self.tree(tree)?.remove(key).map_err(db_err)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, tree: &str, key: &[u8]) -> StoreResult<Option<T>> {
        self.get_raw(tree, key)?
            .map(|bytes| postcard::from_bytes(&bytes).map_err(codec_err))
            .transpose()
    }

    fn put<T: Serialize>(&self, tree: &str, key: &[u8], value: &T) -> StoreResult<()> {
        let bytes = postcard::to_allocvec(value).map_err(codec_err)?;
        self.put_raw(tree, key, &bytes)
    }

    fn values<T: DeserializeOwned>(&self, tree: &str) -> StoreResult<Vec<T>> {
        self.tree(tree)?
            .iter()
            .values()
            .map(|v| postcard::from_bytes(&v.map_err(db_err)?).map_err(codec_err))
            .collect()
    }

    /// Drop every key so the next session pairs from scratch.
    pub fn wipe(&self) -> StoreResult<()> {
        for name in ALL_TREES {
            self.tree(name)?.clear().map_err(db_err)?;
        }
        Ok(())
    }

    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await.map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for SledStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> StoreResult<()> {
        self.put_raw(IDENTITIES, address.as_bytes(), &key)
    }

    async fn load_identity(&self, address: &str) -> StoreResult<Option<Vec<u8>>> {
        self.get_raw(IDENTITIES, address.as_bytes())
    }

    async fn delete_identity(&self, address: &str) -> StoreResult<()> {
        self.remove(IDENTITIES, address.as_bytes())
    }

    async fn get_session(&self, address: &str) -> StoreResult<Option<Vec<u8>>> {
        self.get_raw(SESSIONS, address.as_bytes())
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> StoreResult<()> {
        self.put_raw(SESSIONS, address.as_bytes(), session)
    }

    async fn delete_session(&self, address: &str) -> StoreResult<()> {
        self.remove(SESSIONS, address.as_bytes())
    }

    async fn store_prekey(&self, id: u32, record: &[u8], _uploaded: bool) -> StoreResult<()> {
        self.put_raw(PREKEYS, &id.to_be_bytes(), record)
    }

    async fn load_prekey(&self, id: u32) -> StoreResult<Option<Vec<u8>>> {
        self.get_raw(PREKEYS, &id.to_be_bytes())
    }

    async fn remove_prekey(&self, id: u32) -> StoreResult<()> {
        self.remove(PREKEYS, &id.to_be_bytes())
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> StoreResult<()> {
        self.put_raw(SIGNED_PREKEYS, &id.to_be_bytes(), record)
    }

    async fn load_signed_prekey(&self, id: u32) -> StoreResult<Option<Vec<u8>>> {
        self.get_raw(SIGNED_PREKEYS, &id.to_be_bytes())
    }

    async fn load_all_signed_prekeys(&self) -> StoreResult<Vec<(u32, Vec<u8>)>> {
        let mut out = Vec::new();
        for entry in self.tree(SIGNED_PREKEYS)?.iter() {
            let (key, value) = entry.map_err(db_err)?;
            let id: [u8; 4] = key
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Database("malformed signed prekey id".into()))?;
            out.push((u32::from_be_bytes(id), value.to_vec()));
        }
        Ok(out)
    }

    async fn remove_signed_prekey(&self, id: u32) -> StoreResult<()> {
        self.remove(SIGNED_PREKEYS, &id.to_be_bytes())
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> StoreResult<()> {
        self.put_raw(SENDER_KEYS, address.as_bytes(), record)
    }

    async fn get_sender_key(&self, address: &str) -> StoreResult<Option<Vec<u8>>> {
        self.get_raw(SENDER_KEYS, address.as_bytes())
    }

    async fn delete_sender_key(&self, address: &str) -> StoreResult<()> {
        self.remove(SENDER_KEYS, address.as_bytes())
    }
}

#[async_trait]
impl AppSyncStore for SledStore {
    async fn get_sync_key(&self, key_id: &[u8]) -> StoreResult<Option<wa::message::AppStateSyncKey>> {
        self.get(SYNC_KEYS, key_id)
    }

    async fn set_sync_key(
        &self,
        key_id: &[u8],
        key: wa::message::AppStateSyncKey,
    ) -> StoreResult<()> {
        self.put(SYNC_KEYS, key_id, &key)
    }

    async fn get_version(&self, name: &str) -> StoreResult<HashState> {
        Ok(self.get(VERSIONS, name.as_bytes())?.unwrap_or_default())
    }

    async fn set_version(&self, name: &str, state: HashState) -> StoreResult<()> {
        self.put(VERSIONS, name.as_bytes(), &state)
    }

    async fn put_mutation_macs(
        &self,
        name: &str,
        _version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> StoreResult<()> {
        let tree = self.tree(MUTATION_MACS)?;
        for m in mutations {
            tree.insert(scoped(name, &m.index_mac), m.value_mac.as_slice())
                .map_err(db_err)?;
        }
        Ok(())
    }

    async fn get_mutation_mac(&self, name: &str, index_mac: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.get_raw(MUTATION_MACS, &scoped(name, index_mac))
    }

    async fn delete_mutation_macs(&self, name: &str, index_macs: &[Vec<u8>]) -> StoreResult<()> {
        let tree = self.tree(MUTATION_MACS)?;
        for mac in index_macs {
            tree.remove(scoped(name, mac)).map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolStore for SledStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> StoreResult<Vec<Jid>> {
        let names: Vec<String> = self.get(SKDM, group_jid.as_bytes())?.unwrap_or_default();
        Ok(names.iter().filter_map(|j| j.parse().ok()).collect())
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[Jid]) -> StoreResult<()> {
        let mut names: Vec<String> = self.get(SKDM, group_jid.as_bytes())?.unwrap_or_default();
        for jid in device_jids {
            let jid = jid.to_string();
            if !names.contains(&jid) {
                names.push(jid);
            }
        }
        self.put(SKDM, group_jid.as_bytes(), &names)
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> StoreResult<()> {
        self.remove(SKDM, group_jid.as_bytes())
    }

    async fn get_lid_mapping(&self, lid: &str) -> StoreResult<Option<LidPnMappingEntry>> {
        self.get(LID_BY_LID, lid.as_bytes())
    }

    async fn get_pn_mapping(&self, phone: &str) -> StoreResult<Option<LidPnMappingEntry>> {
        self.get(LID_BY_PN, phone.as_bytes())
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> StoreResult<()> {
        self.put(LID_BY_LID, entry.lid.as_bytes(), entry)?;
        self.put(LID_BY_PN, entry.phone_number.as_bytes(), entry)
    }

    async fn get_all_lid_mappings(&self) -> StoreResult<Vec<LidPnMappingEntry>> {
        self.values(LID_BY_LID)
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> StoreResult<()> {
        self.put_raw(BASE_KEYS, &scoped(address, message_id.as_bytes()), base_key)
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> StoreResult<bool> {
        Ok(self
            .get_raw(BASE_KEYS, &scoped(address, message_id.as_bytes()))?
            .is_some_and(|stored| stored == current_base_key))
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> StoreResult<()> {
        self.remove(BASE_KEYS, &scoped(address, message_id.as_bytes()))
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> StoreResult<()> {
        self.put(DEVICE_LISTS, record.user.as_bytes(), &record)
    }

    async fn get_devices(&self, user: &str) -> StoreResult<Option<DeviceListRecord>> {
        self.get(DEVICE_LISTS, user.as_bytes())
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> StoreResult<()> {
        self.put_raw(FORGET_MARKS, &scoped(group_jid, participant.as_bytes()), &[])
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> StoreResult<Vec<String>> {
        let tree = self.tree(FORGET_MARKS)?;
        let prefix = scoped(group_jid, &[]);
        let mut out = Vec::new();
        for entry in tree.scan_prefix(&prefix) {
            let (key, _) = entry.map_err(db_err)?;
            out.push(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
            tree.remove(key).map_err(db_err)?;
        }
        Ok(out)
    }
}

#[async_trait]
impl DeviceStore for SledStore {
    async fn save(&self, device: &Device) -> StoreResult<()> {
        self.put(DEVICE, DEVICE_KEY, device)
    }

    async fn load(&self) -> StoreResult<Option<Device>> {
        self.get(DEVICE, DEVICE_KEY)
    }

    async fn exists(&self) -> StoreResult<bool> {
        self.tree(DEVICE)?.contains_key(DEVICE_KEY).map_err(db_err)
    }

    async fn create(&self) -> StoreResult<i32> {
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keys_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_1");
        {
            let store = SledStore::open(&path).unwrap();
            store.put_session("5511.0", b"session").await.unwrap();
            store.store_signed_prekey(7, b"spk").await.unwrap();
            store.store_signed_prekey(2, b"spk2").await.unwrap();
            store.flush().await.unwrap();
        }
        let store = SledStore::open(&path).unwrap();
        assert_eq!(
            store.get_session("5511.0").await.unwrap().as_deref(),
            Some(&b"session"[..])
        );
        let ids: Vec<u32> = store
            .load_all_signed_prekeys()
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![2, 7]);
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn wipe_forgets_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.put_identity("5511.0", [7; 32]).await.unwrap();
        store.put_raw(DEVICE, DEVICE_KEY, b"device").unwrap();
        assert!(store.exists().await.unwrap());

        store.wipe().unwrap();
        assert!(!store.exists().await.unwrap());
        assert!(store.load_identity("5511.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn base_keys_and_forget_marks_are_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        store.save_base_key("a", "m1", b"k1").await.unwrap();
        assert!(store.has_same_base_key("a", "m1", b"k1").await.unwrap());
        assert!(!store.has_same_base_key("a", "m1", b"k2").await.unwrap());
        assert!(!store.has_same_base_key("b", "m1", b"k1").await.unwrap());

        store.mark_forget_sender_key("g1", "p1").await.unwrap();
        store.mark_forget_sender_key("g1", "p2").await.unwrap();
        store.mark_forget_sender_key("g2", "p3").await.unwrap();
        assert_eq!(
            store.consume_forget_marks("g1").await.unwrap(),
            vec!["p1".to_string(), "p2".to_string()]
        );
        assert!(store.consume_forget_marks("g1").await.unwrap().is_empty());
        assert_eq!(store.consume_forget_marks("g2").await.unwrap().len(), 1);
    }
}
