use serde::{Deserialize, Serialize};

/// 发起动作的用户，仅包含生成通知文案所需字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
}

impl ActorProfile {
    /// 展示名，缺失时退回用户名
    pub fn display_label(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }
}
