//! 客户目录：只读的客户与账户记录
//!
//! 启动时从 JSON 显式加载（load），以 Arc 交给各工具共享；close 之后查询返回 ToolError::Unavailable。
//! 匹配规则：姓名忽略大小写、首尾空白并合并内部空白；电话与 IBAN 忽略大小写与全部空白。

use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::tools::ToolError;

/// 客户记录
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub iban: String,
    /// 安全问题
    #[serde(default)]
    pub secret: String,
    /// 安全问题答案
    #[serde(default)]
    pub answer: String,
}

/// 对外可展示的客户资料（不含安全问题与答案）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CustomerProfile {
    pub name: String,
    pub phone: String,
    pub iban: String,
}

impl From<&CustomerRecord> for CustomerProfile {
    fn from(r: &CustomerRecord) -> Self {
        Self {
            name: r.name.clone(),
            phone: r.phone.clone(),
            iban: r.iban.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccountRecord {
    pub iban: String,
    #[serde(default)]
    pub premium: bool,
}

/// 账户等级
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountStatus {
    Premium,
    Regular,
    NonClient,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Premium => "Premium",
            AccountStatus::Regular => "Regular",
            AccountStatus::NonClient => "Non-Client",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct DirectoryData {
    #[serde(default)]
    customers: Vec<CustomerRecord>,
    #[serde(default)]
    accounts: Vec<AccountRecord>,
}

/// 识别客户用的查询条件（姓名 / 电话 / IBAN，任意组合）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomerQuery {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub iban: Option<String>,
}

impl CustomerQuery {
    /// 非空条件数量
    pub fn provided(&self) -> usize {
        [&self.name, &self.phone, &self.iban]
            .iter()
            .filter(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
            .count()
    }

    /// 所有非空条件都与记录一致
    pub fn matches(&self, record: &CustomerRecord) -> bool {
        let name_ok = field_matches(&self.name, &record.name, normalize_name);
        let phone_ok = field_matches(&self.phone, &record.phone, normalize_identifier);
        let iban_ok = field_matches(&self.iban, &record.iban, normalize_identifier);
        self.provided() > 0 && name_ok && phone_ok && iban_ok
    }
}

fn field_matches(query: &Option<String>, value: &str, normalize: fn(&str) -> String) -> bool {
    match query.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(q) => normalize(q) == normalize(value),
    }
}

pub fn normalize_name(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn normalize_identifier(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// 只读客户目录
#[derive(Debug, Default)]
pub struct CustomerDirectory {
    data: RwLock<Option<DirectoryData>>,
}

impl CustomerDirectory {
    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Directory(format!("{}: {}", path.display(), e)))?;
        let dir = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), customers = dir.customer_count(), "customer directory loaded");
        Ok(dir)
    }

    pub fn from_json(raw: &str) -> Result<Self, AgentError> {
        let data: DirectoryData =
            serde_json::from_str(raw).map_err(|e| AgentError::Directory(e.to_string()))?;
        Ok(Self {
            data: RwLock::new(Some(data)),
        })
    }

    /// 释放数据；之后的查询均返回 Unavailable
    pub fn close(&self) {
        if let Ok(mut guard) = self.data.write() {
            *guard = None;
        }
    }

    pub fn is_open(&self) -> bool {
        self.data.read().map(|g| g.is_some()).unwrap_or(false)
    }

    pub fn customer_count(&self) -> usize {
        self.with_data(|d| d.customers.len()).unwrap_or(0)
    }

    fn with_data<T>(&self, f: impl FnOnce(&DirectoryData) -> T) -> Result<T, ToolError> {
        let guard = self
            .data
            .read()
            .map_err(|_| ToolError::Internal("customer directory lock poisoned".to_string()))?;
        guard
            .as_ref()
            .map(f)
            .ok_or_else(|| ToolError::Unavailable("customer directory is closed".to_string()))
    }

    /// 按查询条件查找首个匹配的客户
    pub fn find_customer(&self, query: &CustomerQuery) -> Result<Option<CustomerRecord>, ToolError> {
        self.with_data(|d| d.customers.iter().find(|c| query.matches(c)).cloned())
    }

    pub fn account_status(&self, iban: &str) -> Result<AccountStatus, ToolError> {
        let wanted = normalize_identifier(iban);
        self.with_data(|d| {
            d.accounts
                .iter()
                .find(|a| normalize_identifier(&a.iban) == wanted)
                .map(|a| {
                    if a.premium {
                        AccountStatus::Premium
                    } else {
                        AccountStatus::Regular
                    }
                })
                .unwrap_or(AccountStatus::NonClient)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::DIRECTORY_JSON;
    use super::*;

    fn query(name: Option<&str>, phone: Option<&str>, iban: Option<&str>) -> CustomerQuery {
        CustomerQuery {
            name: name.map(String::from),
            phone: phone.map(String::from),
            iban: iban.map(String::from),
        }
    }

    #[test]
    fn test_match_is_case_and_whitespace_insensitive() {
        let dir = CustomerDirectory::from_json(DIRECTORY_JSON).unwrap();
        let found = dir
            .find_customer(&query(Some("  marco   ROSSI "), Some("+39 1234 5678"), None))
            .unwrap();
        assert_eq!(found.map(|c| c.answer), Some("Napoli".to_string()));
    }

    #[test]
    fn test_all_provided_fields_must_match() {
        let dir = CustomerDirectory::from_json(DIRECTORY_JSON).unwrap();
        let found = dir
            .find_customer(&query(Some("Lisa"), Some("+3912345678"), None))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_account_status() {
        let dir = CustomerDirectory::from_json(DIRECTORY_JSON).unwrap();
        assert_eq!(
            dir.account_status(" de89 3704 0044 0532 0130 00 ").unwrap(),
            AccountStatus::Premium
        );
        assert_eq!(
            dir.account_status("IT60X0542811101000000123456").unwrap(),
            AccountStatus::Regular
        );
        assert_eq!(dir.account_status("XX00").unwrap(), AccountStatus::NonClient);
    }

    #[test]
    fn test_closed_directory_is_unavailable() {
        let dir = CustomerDirectory::from_json(DIRECTORY_JSON).unwrap();
        dir.close();
        assert!(!dir.is_open());
        assert!(matches!(
            dir.account_status("DE89"),
            Err(ToolError::Unavailable(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("customers.json");
        std::fs::write(&path, DIRECTORY_JSON).unwrap();
        let directory = CustomerDirectory::load(&path).unwrap();
        assert_eq!(directory.customer_count(), 2);
        assert!(CustomerDirectory::load(dir.path().join("missing.json")).is_err());
    }
}
