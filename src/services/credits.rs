use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

use crate::core::models::UserContext;
use crate::core::store::ContentStore;
use crate::services::functions::{AiFunctions, CheckoutRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPack {
    pub name: &'static str,
    pub credits: u32,
    pub price: &'static str,
    pub price_id: &'static str,
    pub popular: bool,
}

pub const CREDIT_PACKS: [CreditPack; 3] = [
    CreditPack {
        name: "Sparkler Pack",
        credits: 50,
        price: "$10",
        price_id: "price_1RlG89KucnJQ8ZaNSQKACvJE",
        popular: false,
    },
    CreditPack {
        name: "Dreamer Pack",
        credits: 120,
        price: "$20",
        price_id: "price_1RlGA1KucnJQ8ZaNRUb9Ns0M",
        popular: true,
    },
    CreditPack {
        name: "Visionary Pack",
        credits: 300,
        price: "$40",
        price_id: "price_1RlGAoKucnJQ8ZaNuVLpIYJE",
        popular: false,
    },
];

/// Half a credit per illustrated page, a quarter per text-only page, rounded up.
pub fn credit_cost(page_count: u32, with_images: bool) -> u32 {
    if with_images {
        page_count.div_ceil(2)
    } else {
        page_count.div_ceil(4)
    }
}

pub struct CreditsService {
    store: Arc<dyn ContentStore>,
    functions: Arc<dyn AiFunctions>,
}

impl CreditsService {
    pub fn new(store: Arc<dyn ContentStore>, functions: Arc<dyn AiFunctions>) -> Self {
        Self { store, functions }
    }

    pub async fn balance(&self, user: &UserContext) -> Result<i64> {
        let profile = self
            .store
            .get_profile(user.id)
            .await
            .context("Error fetching credits")?;
        Ok(profile.credits)
    }

    /// Opens a checkout session for a pack. Redirecting the user to the
    /// payment page is left to the caller.
    pub async fn start_checkout(&self, user: &UserContext, pack: &CreditPack) -> Result<String> {
        info!("Starting checkout for {} ({})", pack.name, pack.price_id);
        self.functions
            .create_checkout_session(&CheckoutRequest {
                price_id: pack.price_id.to_string(),
                user_id: user.id,
                user_email: user.email.clone(),
            })
            .await
            .context("Could not redirect to checkout. Please try again.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_cost_examples() {
        assert_eq!(credit_cost(6, false), 2);
        assert_eq!(credit_cost(4, true), 2);
        assert_eq!(credit_cost(8, true), 4);
        assert_eq!(credit_cost(4, false), 1);
        assert_eq!(credit_cost(10, false), 3);
        assert_eq!(credit_cost(124, true), 62);
        assert_eq!(credit_cost(124, false), 31);
    }

    #[test]
    fn test_credit_cost_is_monotonic_over_valid_page_counts() {
        for with_images in [true, false] {
            let costs: Vec<u32> = (4..=124)
                .step_by(2)
                .map(|n| credit_cost(n, with_images))
                .collect();
            assert!(costs.windows(2).all(|w| w[0] <= w[1]));
        }
        for n in (4..=124).step_by(2) {
            assert!(credit_cost(n, true) >= credit_cost(n, false));
        }
    }

    #[test]
    fn test_exactly_one_popular_pack() {
        assert_eq!(CREDIT_PACKS.iter().filter(|p| p.popular).count(), 1);
    }
}
