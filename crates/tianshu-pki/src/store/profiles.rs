//! profile注册表
//!
//! 持久化证书profile并维护ID/名称双向映射的TTL缓存。三个内置
//! profile（ROOTCA/SUBCA/ENDUSER）固定存在：不可删除、不可更名、
//! 不可被同名新条目遮蔽。写操作提交后整体失效缓存。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::TtlCache;
use crate::error::{PkiError, Result};
use crate::profile::{
    fixed_profile_names, CertificateProfile, FIXED_PROFILE_ENDUSER, FIXED_PROFILE_ROOTCA,
    FIXED_PROFILE_SUBCA,
};
use crate::store::backend::StorageBackend;

/// 缓存TTL（秒）
const PROFILE_CACHE_TTL_SECONDS: i64 = 300;

/// 自定义profile的起始ID（内置profile占用低位）
const FIRST_CUSTOM_PROFILE_ID: i32 = 10;

/// 持久化形态
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredProfile {
    id: i32,
    name: String,
    profile: CertificateProfile,
}

/// profile注册表
pub struct ProfileRegistry {
    backend: Box<dyn StorageBackend>,
    by_id: TtlCache<i32, StoredProfile>,
    id_by_name: TtlCache<String, i32>,
}

impl ProfileRegistry {
    /// 创建注册表并确保内置profile存在
    pub fn new(backend: Box<dyn StorageBackend>) -> Result<Self> {
        let mut registry = Self {
            backend,
            by_id: TtlCache::new(PROFILE_CACHE_TTL_SECONDS),
            id_by_name: TtlCache::new(PROFILE_CACHE_TTL_SECONDS),
        };
        registry.seed_fixed(FIXED_PROFILE_ROOTCA, CertificateProfile::root_ca())?;
        registry.seed_fixed(FIXED_PROFILE_SUBCA, CertificateProfile::sub_ca())?;
        registry.seed_fixed(FIXED_PROFILE_ENDUSER, CertificateProfile::end_entity())?;
        Ok(registry)
    }

    fn seed_fixed(&mut self, (id, name): (i32, &str), profile: CertificateProfile) -> Result<()> {
        if !self.backend.contains(&Self::key(id))? {
            self.write(&StoredProfile {
                id,
                name: name.to_string(),
                profile,
            })?;
        }
        Ok(())
    }

    fn key(id: i32) -> String {
        format!("profile-{id}")
    }

    fn is_fixed(name: &str) -> bool {
        fixed_profile_names().contains(&name)
    }

    /// 新增profile，返回分配的ID
    pub fn add(&mut self, name: &str, profile: CertificateProfile) -> Result<i32> {
        profile.validate()?;
        if Self::is_fixed(name) {
            return Err(PkiError::ProfileError(format!(
                "profile name '{name}' is reserved"
            )));
        }
        if self.id_by_name(name)?.is_some() {
            return Err(PkiError::ProfileError(format!(
                "profile '{name}' already exists"
            )));
        }

        let next_id = self
            .load_all()?
            .iter()
            .map(|p| p.id)
            .max()
            .unwrap_or(0)
            .max(FIRST_CUSTOM_PROFILE_ID - 1)
            + 1;
        self.write(&StoredProfile {
            id: next_id,
            name: name.to_string(),
            profile,
        })?;
        self.invalidate();
        info!(profile = name, id = next_id, "certificate profile added");
        Ok(next_id)
    }

    /// 按ID读取（读取时升级到当前结构版本）
    pub fn get(&mut self, id: i32) -> Result<Option<CertificateProfile>> {
        Ok(self.stored_by_id(id)?.map(|mut s| {
            s.profile.upgrade();
            s.profile
        }))
    }

    /// 名称查ID
    pub fn id_by_name(&mut self, name: &str) -> Result<Option<i32>> {
        if let Some(id) = self.id_by_name.get(&name.to_string()) {
            return Ok(Some(id));
        }
        self.refresh()?;
        Ok(self.id_by_name.get(&name.to_string()))
    }

    /// ID查名称
    pub fn name_by_id(&mut self, id: i32) -> Result<Option<String>> {
        Ok(self.stored_by_id(id)?.map(|s| s.name))
    }

    /// 覆盖已有profile
    pub fn update(&mut self, id: i32, profile: CertificateProfile) -> Result<()> {
        profile.validate()?;
        let Some(existing) = self.stored_by_id(id)? else {
            return Err(PkiError::ProfileError(format!("no profile with id {id}")));
        };
        self.write(&StoredProfile {
            id,
            name: existing.name,
            profile,
        })?;
        self.invalidate();
        Ok(())
    }

    /// 更名（内置profile不可作为源或目标）
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if Self::is_fixed(old_name) || Self::is_fixed(new_name) {
            return Err(PkiError::ProfileError(
                "fixed profiles cannot be renamed or shadowed".to_string(),
            ));
        }
        if self.id_by_name(new_name)?.is_some() {
            return Err(PkiError::ProfileError(format!(
                "profile '{new_name}' already exists"
            )));
        }
        let Some(id) = self.id_by_name(old_name)? else {
            return Err(PkiError::ProfileError(format!(
                "no profile named '{old_name}'"
            )));
        };
        let stored = self.stored_by_id(id)?.ok_or_else(|| {
            PkiError::ProfileError(format!("no profile with id {id}"))
        })?;
        self.write(&StoredProfile {
            id,
            name: new_name.to_string(),
            profile: stored.profile,
        })?;
        self.invalidate();
        info!(from = old_name, to = new_name, "certificate profile renamed");
        Ok(())
    }

    /// 复制为新名称
    pub fn clone_profile(&mut self, source_name: &str, new_name: &str) -> Result<i32> {
        let Some(id) = self.id_by_name(source_name)? else {
            return Err(PkiError::ProfileError(format!(
                "no profile named '{source_name}'"
            )));
        };
        let profile = self.get(id)?.ok_or_else(|| {
            PkiError::ProfileError(format!("no profile with id {id}"))
        })?;
        self.add(new_name, profile)
    }

    /// 删除（内置profile不可删除）
    pub fn remove(&mut self, name: &str) -> Result<()> {
        if Self::is_fixed(name) {
            return Err(PkiError::ProfileError(format!(
                "fixed profile '{name}' cannot be removed"
            )));
        }
        let Some(id) = self.id_by_name(name)? else {
            return Err(PkiError::ProfileError(format!("no profile named '{name}'")));
        };
        self.backend.delete(&Self::key(id))?;
        self.invalidate();
        info!(profile = name, "certificate profile removed");
        Ok(())
    }

    /// 列出全部(ID, 名称)
    pub fn list(&mut self) -> Result<Vec<(i32, String)>> {
        let mut all: Vec<(i32, String)> = self
            .load_all()?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        Ok(all)
    }

    fn stored_by_id(&mut self, id: i32) -> Result<Option<StoredProfile>> {
        if let Some(stored) = self.by_id.get(&id) {
            return Ok(Some(stored));
        }
        self.refresh()?;
        Ok(self.by_id.get(&id))
    }

    /// 从后端整体重建两个缓存
    fn refresh(&mut self) -> Result<()> {
        let all = self.load_all()?;
        let mut by_id = HashMap::new();
        let mut id_by_name = HashMap::new();
        for stored in all {
            id_by_name.insert(stored.name.clone(), stored.id);
            by_id.insert(stored.id, stored);
        }
        self.by_id.rebuild(by_id);
        self.id_by_name.rebuild(id_by_name);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<StoredProfile>> {
        let mut all = Vec::new();
        for key in self.backend.list_keys()? {
            if !key.starts_with("profile-") {
                continue;
            }
            if let Some(bytes) = self.backend.get(&key)? {
                all.push(serde_json::from_slice(&bytes)?);
            }
        }
        Ok(all)
    }

    fn write(&mut self, stored: &StoredProfile) -> Result<()> {
        let bytes = serde_json::to_vec(stored)?;
        self.backend.put(&Self::key(stored.id), &bytes)
    }

    fn invalidate(&mut self) {
        self.by_id.invalidate();
        self.id_by_name.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryBackend;

    fn registry() -> ProfileRegistry {
        ProfileRegistry::new(Box::new(MemoryBackend::new())).unwrap()
    }

    #[test]
    fn test_fixed_profiles_seeded() {
        let mut reg = registry();
        assert_eq!(reg.id_by_name("ROOTCA").unwrap(), Some(1));
        assert_eq!(reg.id_by_name("SUBCA").unwrap(), Some(2));
        assert_eq!(reg.id_by_name("ENDUSER").unwrap(), Some(3));
        assert!(reg.get(3).unwrap().is_some());
    }

    #[test]
    fn test_fixed_profiles_protected() {
        let mut reg = registry();
        assert!(reg.add("ROOTCA", CertificateProfile::root_ca()).is_err());
        assert!(reg.remove("ENDUSER").is_err());
        assert!(reg.rename("SUBCA", "other").is_err());
        assert!(reg.rename("custom", "ROOTCA").is_err());
    }

    #[test]
    fn test_add_get_rename_remove() {
        let mut reg = registry();
        let id = reg
            .add("tls-server", CertificateProfile::end_entity())
            .unwrap();
        assert!(id >= 10);
        assert_eq!(reg.id_by_name("tls-server").unwrap(), Some(id));
        assert_eq!(reg.name_by_id(id).unwrap().as_deref(), Some("tls-server"));

        reg.rename("tls-server", "tls-web").unwrap();
        assert_eq!(reg.id_by_name("tls-server").unwrap(), None);
        assert_eq!(reg.id_by_name("tls-web").unwrap(), Some(id));

        reg.remove("tls-web").unwrap();
        assert!(reg.get(id).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut reg = registry();
        reg.add("dup", CertificateProfile::end_entity()).unwrap();
        assert!(reg.add("dup", CertificateProfile::end_entity()).is_err());
    }

    #[test]
    fn test_clone_assigns_new_id() {
        let mut reg = registry();
        let cloned = reg.clone_profile("ENDUSER", "enduser-copy").unwrap();
        assert!(cloned >= 10);
        let profile = reg.get(cloned).unwrap().unwrap();
        assert_eq!(profile.validity_days, 365);
    }

    #[test]
    fn test_cache_invalidated_on_write() {
        let mut reg = registry();
        let id = reg.add("short", CertificateProfile::end_entity()).unwrap();
        assert_eq!(reg.get(id).unwrap().unwrap().validity_days, 365);

        let updated = CertificateProfile::end_entity().with_validity_days(30);
        reg.update(id, updated).unwrap();
        assert_eq!(reg.get(id).unwrap().unwrap().validity_days, 30);
    }
}
