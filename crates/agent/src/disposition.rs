//! Role-specific prompt configuration.
//!
//! A [`Persona`] is chosen once per agent and rendered into the two system
//! messages the agent sends to its gateway. Templates are `tera` strings with
//! `agent_id`, `counterpart`, `target_price` and `max_words` in scope.

use parley_core::config::PartyConfig;
use parley_core::{AgentId, Role};
use rust_decimal::Decimal;
use tera::{Context, Tera};
use thiserror::Error;

pub const DEFAULT_SELLER_PERSONA: &str = "You are {{ agent_id }}, a seller. You hold an NFT that \
entitles its owner to have a service performed for them. Negotiate its sale with the \
{{ counterpart }} using the conversation so far. Try to close the deal, but do not give ground too \
easily. Your preferred sale price is {{ target_price }} ETH; quote prices that follow the \
discussion. Answer in no more than {{ max_words }} words.";

pub const DEFAULT_BUYER_PERSONA: &str = "You are {{ agent_id }}, a buyer. The {{ counterpart }} \
holds an NFT that entitles its owner to have a service performed for them. Negotiate to buy it \
using the conversation so far. Try to close the deal, but do not give ground too easily. Your \
preferred purchase price is {{ target_price }} ETH; quote prices that follow the discussion. \
Answer in no more than {{ max_words }} words.";

pub const DEFAULT_DECISION_TEMPLATE: &str = "You are {{ agent_id }}. Judging only from the \
conversation so far, state whether the trade should go ahead. If it should, answer \
TRUE_<agreed_price>, for example TRUE_<1.0>. If it should not, answer FALSE_<0>. Your whole \
answer must be exactly one of those tokens, angle brackets included, with nothing else.";

#[derive(Debug, Error)]
pub enum DispositionError {
    #[error("failed to render {template} template for `{agent}`: {message}")]
    Render { agent: AgentId, template: &'static str, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonaSpec {
    pub target_price: Decimal,
    pub max_words: u32,
    pub persona_template: String,
    pub decision_template: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Persona {
    Seller(PersonaSpec),
    Buyer(PersonaSpec),
}

impl Persona {
    pub fn seller(target_price: Decimal, max_words: u32) -> Self {
        Self::Seller(PersonaSpec {
            target_price,
            max_words,
            persona_template: DEFAULT_SELLER_PERSONA.to_string(),
            decision_template: DEFAULT_DECISION_TEMPLATE.to_string(),
        })
    }

    pub fn buyer(target_price: Decimal, max_words: u32) -> Self {
        Self::Buyer(PersonaSpec {
            target_price,
            max_words,
            persona_template: DEFAULT_BUYER_PERSONA.to_string(),
            decision_template: DEFAULT_DECISION_TEMPLATE.to_string(),
        })
    }

    pub fn from_config(role: Role, party: &PartyConfig) -> Self {
        let mut persona = match role {
            Role::Seller => Self::seller(party.target_price, party.max_words),
            Role::Buyer => Self::buyer(party.target_price, party.max_words),
        };
        if let Some(template) = &party.persona_template {
            persona = persona.with_persona_template(template.clone());
        }
        if let Some(template) = &party.decision_template {
            persona = persona.with_decision_template(template.clone());
        }
        persona
    }

    pub fn with_persona_template(mut self, template: impl Into<String>) -> Self {
        self.spec_mut().persona_template = template.into();
        self
    }

    pub fn with_decision_template(mut self, template: impl Into<String>) -> Self {
        self.spec_mut().decision_template = template.into();
        self
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Seller(_) => Role::Seller,
            Self::Buyer(_) => Role::Buyer,
        }
    }

    pub fn spec(&self) -> &PersonaSpec {
        match self {
            Self::Seller(spec) | Self::Buyer(spec) => spec,
        }
    }

    fn spec_mut(&mut self) -> &mut PersonaSpec {
        match self {
            Self::Seller(spec) | Self::Buyer(spec) => spec,
        }
    }
}

/// Immutable per-agent configuration with both system messages rendered up front.
#[derive(Clone, Debug)]
pub struct Disposition {
    id: AgentId,
    persona: Persona,
    system_message: String,
    decision_message: String,
}

impl Disposition {
    pub fn new(number: u32, persona: Persona) -> Result<Self, DispositionError> {
        let role = persona.role();
        let id = AgentId::new(role, number);
        let spec = persona.spec();

        let mut context = Context::new();
        context.insert("agent_id", id.as_str());
        context.insert("counterpart", role.counterpart().as_str());
        context.insert("target_price", &spec.target_price.to_string());
        context.insert("max_words", &spec.max_words);

        let system_message = render(&id, "persona", &spec.persona_template, &context)?;
        let decision_message = render(&id, "decision", &spec.decision_template, &context)?;

        Ok(Self { id, persona, system_message, decision_message })
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.persona.role()
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn target_price(&self) -> Decimal {
        self.persona.spec().target_price
    }

    pub fn max_words(&self) -> u32 {
        self.persona.spec().max_words
    }

    pub fn system_message(&self) -> &str {
        &self.system_message
    }

    pub fn decision_message(&self) -> &str {
        &self.decision_message
    }
}

fn render(
    agent: &AgentId,
    template_name: &'static str,
    template: &str,
    context: &Context,
) -> Result<String, DispositionError> {
    Tera::one_off(template, context, false).map_err(|error| DispositionError::Render {
        agent: agent.clone(),
        template: template_name,
        message: render_error_chain(&error),
    })
}

fn render_error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

#[cfg(test)]
mod tests {
    use parley_core::config::PartyConfig;
    use parley_core::Role;
    use rust_decimal::Decimal;

    use super::{Disposition, DispositionError, Persona};

    #[test]
    fn seller_persona_renders_identity_and_target() {
        let disposition =
            Disposition::new(1, Persona::seller(Decimal::ONE, 150)).expect("default templates");

        assert_eq!(disposition.id().as_str(), "seller_1");
        assert_eq!(disposition.role(), Role::Seller);
        assert!(disposition.system_message().contains("You are seller_1, a seller"));
        assert!(disposition.system_message().contains("1 ETH"));
        assert!(disposition.system_message().contains("150 words"));
        assert!(disposition.decision_message().contains("TRUE_<agreed_price>"));
    }

    #[test]
    fn buyer_persona_names_the_counterpart() {
        let disposition = Disposition::new(2, Persona::buyer(Decimal::new(5, 1), 80))
            .expect("default templates");

        assert_eq!(disposition.id().as_str(), "buyer_2");
        assert!(disposition.system_message().contains("The seller holds an NFT"));
        assert!(disposition.system_message().contains("0.5 ETH"));
        assert_eq!(disposition.target_price(), Decimal::new(5, 1));
        assert_eq!(disposition.max_words(), 80);
    }

    #[test]
    fn config_templates_replace_defaults() {
        let party = PartyConfig {
            number: 7,
            target_price: Decimal::new(-2, 0),
            max_words: 20,
            persona_template: Some("{{ agent_id }} wants {{ target_price }}".to_string()),
            decision_template: Some("decide, {{ agent_id }}".to_string()),
        };

        let disposition = Disposition::new(party.number, Persona::from_config(Role::Seller, &party))
            .expect("custom templates render");

        assert_eq!(disposition.system_message(), "seller_7 wants -2");
        assert_eq!(disposition.decision_message(), "decide, seller_7");
    }

    #[test]
    fn broken_template_reports_render_error() {
        let persona = Persona::buyer(Decimal::ONE, 10).with_persona_template("{{ unclosed");
        let error = Disposition::new(2, persona).expect_err("template must fail");

        match error {
            DispositionError::Render { agent, template, .. } => {
                assert_eq!(agent.as_str(), "buyer_2");
                assert_eq!(template, "persona");
            }
        }
    }
}
