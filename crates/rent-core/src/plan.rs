//! # Subscription Plans
//!
//! Plans are loaded from `config/plans.toml`. Prices and token amounts are
//! always taken from the catalog, never from request bodies.

use crate::error::{RentalError, RentalResult};
use crate::purchase::Currency;
use serde::{Deserialize, Serialize};

/// A purchasable bundle of entitlement tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier (e.g., "starter")
    pub id: String,

    /// Display name
    pub name: String,

    /// Tokens credited once the payment is captured
    pub tokens: i64,

    /// Price in smallest currency unit (cents for USD)
    pub price: i64,

    #[serde(default)]
    pub currency: Currency,

    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Plan {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tokens: i64,
        price: i64,
        currency: Currency,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tokens,
            price,
            currency,
            active: true,
        }
    }

    /// Reject plans that could never be purchased correctly
    pub fn validate(&self) -> RentalResult<()> {
        if self.tokens <= 0 {
            return Err(RentalError::Validation(format!(
                "plan {} must grant a positive number of tokens",
                self.id
            )));
        }
        if self.price <= 0 {
            return Err(RentalError::Validation(format!(
                "plan {} must have a positive price",
                self.id
            )));
        }
        Ok(())
    }
}

/// Plan catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanCatalog {
    #[serde(default)]
    pub plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML catalog
    pub fn from_toml(content: &str) -> RentalResult<Self> {
        let catalog: PlanCatalog = toml::from_str(content)
            .map_err(|e| RentalError::Configuration(format!("invalid plan catalog: {}", e)))?;

        for plan in &catalog.plans {
            plan.validate()
                .map_err(|e| RentalError::Configuration(e.to_string()))?;
        }

        Ok(catalog)
    }

    /// Builder: add a plan
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn get(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    /// Look up a plan that can currently be bought
    pub fn purchasable(&self, id: &str) -> RentalResult<&Plan> {
        match self.get(id) {
            Some(plan) if plan.active => Ok(plan),
            Some(_) => Err(RentalError::Validation(format!("plan is not available: {}", id))),
            None => Err(RentalError::not_found("plan", id)),
        }
    }

    pub fn active_plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter().filter(|p| p.active)
    }
}
