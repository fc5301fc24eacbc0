//! Personal vs company scoping of service calls

use super::request::OutboundRequest;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    Personal,
    Company(i64),
}

impl Scope {
    /// Non-positive ids mean personal.
    pub fn from_company(id: Option<i64>) -> Self {
        match id {
            Some(id) if id > 0 => Scope::Company(id),
            _ => Scope::Personal,
        }
    }

    pub fn company_id(&self) -> Option<i64> {
        match self {
            Scope::Company(id) => Some(*id),
            Scope::Personal => None,
        }
    }

    /// The backend reads either spelling depending on the controller.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match self {
            Scope::Company(id) => vec![
                ("companyId".to_string(), id.to_string()),
                ("company_id".to_string(), id.to_string()),
            ],
            Scope::Personal => Vec::new(),
        }
    }

    /// Add company query params, or keep a personal call free of the
    /// client's `X-Company-Id` header.
    pub fn apply(&self, req: OutboundRequest) -> OutboundRequest {
        req.query_pairs(self.query_pairs())
            .skip_tenant_scope(*self == Scope::Personal)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Scope::Company(_) => "company",
            Scope::Personal => "personal",
        }
    }
}
