//! Fixed-payload REST stubs used by the companion app.

use serde::Serialize;

/// Body of `/login`. Always the same placeholder credentials.
#[allow(missing_docs)]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_id: u64,
    pub access_token: &'static str,
    pub refresh_token: &'static str,
    pub expires_in: u64,
    pub first_login: bool,
    pub account_provider: &'static str,
    pub change_date: &'static str,
    pub error_code: i32,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            user_id: 1,
            access_token: "accessToken",
            refresh_token: "refreshToken",
            expires_in: 3600,
            first_login: true,
            account_provider: "accountProvider",
            change_date: "changeDate",
            error_code: 0,
        }
    }
}

/// One record of `/device/bindings`.
#[allow(missing_docs)]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub binding_id: usize,
    pub device_id: String,
    pub user_id: u64,
    pub state: &'static str,
    pub change_date: &'static str,
    pub code: &'static str,
    pub name: String,
}

/// One binding per group id, indexed in the given order.
pub fn bindings<I, S>(group_ids: I) -> Vec<Binding>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    group_ids
        .into_iter()
        .enumerate()
        .map(|(index, id)| {
            let id = id.into();
            Binding {
                binding_id: index,
                name: id.clone(),
                device_id: id,
                user_id: 1,
                state: "BOUND",
                change_date: "changeDate",
                code: "code",
            }
        })
        .collect()
}
