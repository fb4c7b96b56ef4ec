pub mod banner;
pub mod config;
pub mod correlate;
pub mod evidence;
pub mod gateway;
pub mod message;
pub mod normalize;
pub mod relay;
pub mod rewrite;
pub mod rules;
pub mod scorer;
pub mod signals;

pub use config::Config;
pub use gateway::Gateway;
pub use message::MailMessage;
pub use rewrite::{RewriteOptions, RewriteOutcome, Rewriter};
pub use rules::{Detection, Hit, HitLocation, RuleSet};
pub use signals::Signal;
