//! 主体DN处理
//!
//! 提供DN的规范化字符串形式（所有按DN查询的存储键都用它）、
//! RDN顺序与字符串编码策略，以及从DN派生稳定CA ID。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PkiError, Result};

/// RDN顺序
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DnOrder {
    /// LDAP顺序（CN在前）
    Ldap,
    /// X.500逆序（C在前）
    Reverse,
}

/// DN字符串编码
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DnEncoding {
    /// UTF8String
    Utf8,
    /// PrintableString
    Printable,
}

/// 证书主体DN
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectDn {
    /// 通用名
    pub common_name: String,
    /// 组织单位
    pub organizational_unit: Option<String>,
    /// 组织
    pub organization: Option<String>,
    /// 城市
    pub locality: Option<String>,
    /// 省/州
    pub state: Option<String>,
    /// 国家
    pub country: Option<String>,
}

impl SubjectDn {
    /// 仅含CN的DN
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organizational_unit: None,
            organization: None,
            locality: None,
            state: None,
            country: None,
        }
    }

    /// 设置组织信息
    pub fn with_organization(mut self, org: &str) -> Self {
        self.organization = Some(org.to_string());
        self
    }

    /// 设置地理位置信息
    pub fn with_location(mut self, country: &str, state: &str, locality: &str) -> Self {
        self.country = Some(country.to_string());
        self.state = Some(state.to_string());
        self.locality = Some(locality.to_string());
        self
    }

    /// 规范化字符串形式
    ///
    /// 固定为LDAP顺序 `CN=..,OU=..,O=..,L=..,ST=..,C=..`，字段值去除首尾空白。
    /// 所有按DN做键的查询必须使用该形式，否则查找会静默落空。
    pub fn canonical(&self) -> String {
        let mut parts = vec![format!("CN={}", self.common_name.trim())];
        if let Some(ou) = &self.organizational_unit {
            parts.push(format!("OU={}", ou.trim()));
        }
        if let Some(o) = &self.organization {
            parts.push(format!("O={}", o.trim()));
        }
        if let Some(l) = &self.locality {
            parts.push(format!("L={}", l.trim()));
        }
        if let Some(st) = &self.state {
            parts.push(format!("ST={}", st.trim()));
        }
        if let Some(c) = &self.country {
            parts.push(format!("C={}", c.trim()));
        }
        parts.join(",")
    }

    /// 从规范化（或任意顺序的RFC 4514）字符串解析
    ///
    /// 未知属性键被忽略。
    pub fn from_canonical(s: &str) -> Result<Self> {
        let mut dn = SubjectDn::new(String::new());
        for part in s.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PkiError::ParseError(format!("Invalid DN component: {part}")))?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_uppercase().as_str() {
                "CN" => dn.common_name = value,
                "OU" => dn.organizational_unit = Some(value),
                "O" => dn.organization = Some(value),
                "L" => dn.locality = Some(value),
                "ST" => dn.state = Some(value),
                "C" => dn.country = Some(value),
                _ => {}
            }
        }
        if dn.common_name.is_empty() {
            return Err(PkiError::ParseError(format!("DN has no CN component: {s}")));
        }
        Ok(dn)
    }

    /// 从解析后的X.509名称提取DN
    pub fn from_x509_name(name: &x509_cert::name::Name) -> Result<Self> {
        // x509-cert 按 RFC 4514 输出（LDAP顺序），规范化解析对顺序不敏感
        Self::from_canonical(&name.to_string())
    }

    /// 按策略构造 rcgen 的 DistinguishedName
    ///
    /// Ldap顺序CN在前，Reverse顺序C在前；两种顺序必须对subject与
    /// 自签发时的issuer一致使用。
    pub fn to_rcgen(&self, order: DnOrder, encoding: DnEncoding) -> Result<rcgen::DistinguishedName> {
        let mut components: Vec<(rcgen::DnType, &str)> = Vec::new();
        components.push((rcgen::DnType::CommonName, self.common_name.as_str()));
        if let Some(ou) = &self.organizational_unit {
            components.push((rcgen::DnType::OrganizationalUnitName, ou));
        }
        if let Some(o) = &self.organization {
            components.push((rcgen::DnType::OrganizationName, o));
        }
        if let Some(l) = &self.locality {
            components.push((rcgen::DnType::LocalityName, l));
        }
        if let Some(st) = &self.state {
            components.push((rcgen::DnType::StateOrProvinceName, st));
        }
        if let Some(c) = &self.country {
            components.push((rcgen::DnType::CountryName, c));
        }

        if matches!(order, DnOrder::Reverse) {
            components.reverse();
        }

        let mut dn = rcgen::DistinguishedName::new();
        for (dn_type, value) in components {
            match encoding {
                DnEncoding::Utf8 => dn.push(dn_type, value),
                DnEncoding::Printable => {
                    let ps = rcgen::PrintableString::try_from(value).map_err(|e| {
                        PkiError::ParseError(format!(
                            "DN value '{value}' is not a valid PrintableString: {e}"
                        ))
                    })?;
                    dn.push(dn_type, rcgen::DnValue::PrintableString(ps));
                }
            }
        }
        Ok(dn)
    }

    /// 从规范化DN派生稳定的CA ID
    ///
    /// 取SHA-256前4字节构造正整数，CA整个生命周期内不变。
    pub fn ca_id(&self) -> i32 {
        ca_id_from_canonical(&self.canonical())
    }
}

/// 从规范化DN字符串派生CA ID
pub fn ca_id_from_canonical(canonical_dn: &str) -> i32 {
    let digest = Sha256::digest(canonical_dn.as_bytes());
    let raw = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (raw & 0x7fff_ffff) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form_is_order_fixed() {
        let dn = SubjectDn::new("Test CA")
            .with_organization("Tianshu PKI")
            .with_location("CN", "Shanghai", "Shanghai");
        assert_eq!(
            dn.canonical(),
            "CN=Test CA,O=Tianshu PKI,L=Shanghai,ST=Shanghai,C=CN"
        );
    }

    #[test]
    fn test_parse_any_order() {
        let a = SubjectDn::from_canonical("CN=Foo,O=Bar,C=CN").unwrap();
        let b = SubjectDn::from_canonical("C=CN,O=Bar,CN=Foo").unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_ca_id_stable_and_positive() {
        let dn = SubjectDn::new("Root CA").with_organization("Tianshu PKI");
        let id1 = dn.ca_id();
        let id2 = dn.ca_id();
        assert_eq!(id1, id2);
        assert!(id1 >= 0);
    }

    #[test]
    fn test_missing_cn_rejected() {
        assert!(SubjectDn::from_canonical("O=No Common Name").is_err());
    }

    #[test]
    fn test_printable_rejects_non_ascii() {
        let dn = SubjectDn::new("天枢CA");
        assert!(dn.to_rcgen(DnOrder::Ldap, DnEncoding::Printable).is_err());
        assert!(dn.to_rcgen(DnOrder::Ldap, DnEncoding::Utf8).is_ok());
    }
}
