use foundation_core::Config;
use foundation_orchestrate::{
    run_policy_update, PolicyUpdateOptions, RoleSelector, RoleUpdate, RunContext, TokioClock,
};
use serde_json::{json, Value};

use super::{emit, exit_code, failed, session};
use crate::summary::render_policy_updates;
use crate::OutputFormat;

pub(crate) fn cmd_update_role_policy(
    config: &Config,
    environment: &str,
    validate_trust: bool,
    output: OutputFormat,
) -> i32 {
    let (rt, provider) = session(config, output);
    let clock = TokioClock::new();
    let ctx = RunContext::new(config, provider.as_ref(), &clock);
    let options = PolicyUpdateOptions {
        selector: RoleSelector::parse(environment),
        validate_trust,
    };

    match rt.block_on(run_policy_update(&ctx, &options)) {
        Ok(updates) => {
            let value = updates_json(&updates, config.dry_run);
            emit(&value, || render_policy_updates(&updates, config.dry_run), output);
            exit_code(updates.iter().all(|u| !u.failed()))
        }
        Err(e) => failed(&e, output),
    }
}

fn updates_json(updates: &[RoleUpdate], dry_run: bool) -> Value {
    let roles: Vec<Value> = updates
        .iter()
        .map(|u| {
            json!({
                "environment": u.environment,
                "role": u.role,
                "actions": u.actions(),
                "permission_diff": u.permission_diff.as_ref().map(|d| d.to_text()),
                "trust_diff": u.trust_diff.as_ref().map(|d| d.to_text()),
            })
        })
        .collect();
    json!({ "dry_run": dry_run, "roles": roles })
}
