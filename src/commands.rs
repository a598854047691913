use crate::{emit_success, AttrCommand, KeyCommand, OutputMode, SpCommand, SpOptions};
use owo_colors::OwoColorize;
use spstore::config::{self, StoreConfig};
use spstore::ui::{
    attribute_table, banner, field, header, info, muted, section, sp_table, stats_table, success,
    warn, Icons,
};
use spstore::{
    AttributeKind, AttributeMatch, LogoutBinding, NewServiceProvider, Protocol, SchemaStatus,
    ServiceProvider, SpMatch, SpPatch, SpStore, UpsertOutcome,
};
use std::path::Path;

pub fn run_config_init(output_mode: OutputMode, path: &Path, force: bool) -> anyhow::Result<()> {
    let store_config = StoreConfig {
        database: Some(config::default_database_path().display().to_string()),
        ..StoreConfig::default()
    };
    config::write_config(path, &store_config, force)?;

    if output_mode.is_human() {
        success(&format!("Wrote {}", path.display()));
    } else {
        emit_success(output_mode, "config.init", serde_json::json!({ "path": path }))?;
    }
    Ok(())
}

pub fn run_init(
    store: &SpStore,
    output_mode: OutputMode,
    status: &SchemaStatus,
    database: &Path,
) -> anyhow::Result<()> {
    if !output_mode.is_human() {
        return emit_success(output_mode, "init", serde_json::to_value(status)?);
    }

    banner("SP Store", &format!("{}", database.display()));
    match status {
        SchemaStatus::Created { version } => {
            success(&format!("Created SP tables at schema version {}", version));
        }
        SchemaStatus::Migrated { from, to, steps } => {
            success(&format!("Migrated schema {} -> {}", from, to));
            for step in steps {
                println!("  {} {}", Icons::MOD, step);
            }
        }
        SchemaStatus::UpToDate { version } => {
            success(&format!("Schema is up to date ({})", version));
        }
        SchemaStatus::Ahead { stored, supported } => {
            warn(&format!(
                "Stored schema {} is newer than this build supports ({})",
                stored, supported
            ));
        }
    }
    let tables = store.tables();
    info(
        "Tables",
        &format!("{}, {}, {}", tables.sp, tables.attributes, tables.keypairs),
    );
    Ok(())
}

pub fn run_status(store: &SpStore, output_mode: OutputMode, database: &Path) -> anyhow::Result<()> {
    let stats = store.stats()?;

    if output_mode.is_human() {
        header(&format!("SP Store Statistics ({})", database.display()));
        println!("{}", stats_table(&stats));
    } else {
        emit_success(output_mode, "status", serde_json::to_value(&stats)?)?;
    }
    Ok(())
}

pub fn run_sp(store: &SpStore, output_mode: OutputMode, command: SpCommand) -> anyhow::Result<()> {
    match command {
        SpCommand::List => {
            let sps = store.list_sps()?;
            if !output_mode.is_human() {
                return emit_success(output_mode, "sp.list", serde_json::to_value(&sps)?);
            }
            if sps.is_empty() {
                println!("{} No service providers configured.", Icons::EMPTY);
            } else {
                println!("{}", sp_table(&sps));
            }
        }

        SpCommand::Show { id } => {
            let Some(sp) = store.get_sp(id)? else {
                anyhow::bail!("No service provider with id {}", id);
            };
            let attrs = store.get_attributes(id)?;
            let keypair = store.get_keypair(id)?;

            if !output_mode.is_human() {
                return emit_success(
                    output_mode,
                    "sp.show",
                    serde_json::json!({ "sp": sp, "attributes": attrs, "keypair": keypair }),
                );
            }

            print_sp(&sp);
            section("Attributes");
            if attrs.is_empty() {
                println!("  {}", muted("no attribute mappings"));
            } else {
                println!("{}", attribute_table(&attrs));
            }
            section("Key pair");
            match keypair {
                Some(kp) => field("Algorithm", Some(kp.encryption_algorithm.as_str())),
                None => println!("  {}", muted("no key pair")),
            }
        }

        SpCommand::Find { issuer, name, acs } => {
            let found = match (issuer, name, acs) {
                (Some(issuer), _, _) => store.find_sp_by_issuer(&issuer)?,
                (_, Some(name), _) => store.find_sp_by_name(&name)?,
                (_, _, Some(acs)) => store.find_sp_by_acs(&acs)?,
                _ => anyhow::bail!("Pass one of --issuer, --name or --acs"),
            };

            if !output_mode.is_human() {
                return emit_success(output_mode, "sp.find", serde_json::to_value(&found)?);
            }
            match found {
                Some(sp) => print_sp(&sp),
                None => println!("{} No matching service provider.", Icons::EMPTY),
            }
        }

        SpCommand::Add {
            name,
            issuer,
            acs,
            options,
        } => {
            if store.find_sp_by_issuer(&issuer)?.is_some() {
                anyhow::bail!("A service provider with issuer {} already exists", issuer);
            }
            let new = new_sp_from(NewServiceProvider::new(name, issuer, acs), options)?;
            let id = store.insert_sp(&new)?;

            if output_mode.is_human() {
                success(&format!("Registered service provider {} (id {})", new.name, id));
            } else {
                emit_success(output_mode, "sp.add", serde_json::json!({ "id": id }))?;
            }
        }

        SpCommand::Update {
            id,
            name,
            issuer,
            acs,
            options,
            clear_signing_cert,
            clear_encryption_cert,
        } => {
            if store.get_sp(id)?.is_none() {
                anyhow::bail!("No service provider with id {}", id);
            }

            let mut patch = patch_from(options)?;
            patch.name = name;
            patch.issuer = issuer;
            patch.acs_url = acs;
            if clear_signing_cert {
                patch.signing_cert = Some(None);
            }
            if clear_encryption_cert {
                patch.encryption_cert = Some(None);
            }

            if patch.is_empty() {
                anyhow::bail!("Nothing to update; pass at least one field");
            }
            store.update_sp(&patch, &SpMatch::by_id(id))?;

            if output_mode.is_human() {
                success(&format!("Updated service provider {}", id));
            } else {
                emit_success(output_mode, "sp.update", serde_json::json!({ "id": id }))?;
            }
        }

        SpCommand::Delete { id } => {
            let deleted = store.delete_sp(&SpMatch::by_id(id), &AttributeMatch::by_sp(id))?;
            if deleted == 0 {
                anyhow::bail!("No service provider with id {}", id);
            }

            if output_mode.is_human() {
                println!("{} Deleted service provider {}", Icons::DEL, id);
            } else {
                emit_success(output_mode, "sp.delete", serde_json::json!({ "id": id }))?;
            }
        }
    }
    Ok(())
}

pub fn run_attr(store: &SpStore, output_mode: OutputMode, command: AttrCommand) -> anyhow::Result<()> {
    match command {
        AttrCommand::List { sp_id } => {
            let attrs = store.get_attributes(sp_id)?;
            if !output_mode.is_human() {
                return emit_success(output_mode, "attr.list", serde_json::to_value(&attrs)?);
            }
            if attrs.is_empty() {
                println!("{} No attribute mappings for SP {}.", Icons::EMPTY, sp_id);
            } else {
                println!("{}", attribute_table(&attrs));
            }
        }

        AttrCommand::Add {
            sp_id,
            name,
            value,
            group,
        } => {
            let kind = if group {
                AttributeKind::Group
            } else {
                AttributeKind::Normal
            };
            let id = store.insert_attribute(sp_id, &name, &value, kind)?;

            if output_mode.is_human() {
                let icon = if group { Icons::GROUP } else { Icons::LINK };
                println!(
                    "{} Mapped {} <- {} for SP {}",
                    icon,
                    name.style(spstore::ui::theme().accent.clone()),
                    value,
                    sp_id
                );
            } else {
                emit_success(output_mode, "attr.add", serde_json::json!({ "id": id }))?;
            }
        }

        AttrCommand::Delete { sp_id, name } => {
            let mut filter = AttributeMatch::by_sp(sp_id);
            if let Some(name) = name {
                filter = filter.with_name(name);
            }
            let removed = store.delete_attributes(&filter)?;

            if output_mode.is_human() {
                println!("{} Removed {} attribute mapping(s)", Icons::DEL, removed);
            } else {
                emit_success(output_mode, "attr.delete", serde_json::json!({ "removed": removed }))?;
            }
        }
    }
    Ok(())
}

pub fn run_key(store: &SpStore, output_mode: OutputMode, command: KeyCommand) -> anyhow::Result<()> {
    match command {
        KeyCommand::Show { sp_id } => {
            let keypair = store.get_keypair(sp_id)?;
            if !output_mode.is_human() {
                return emit_success(output_mode, "key.show", serde_json::to_value(&keypair)?);
            }
            match keypair {
                Some(kp) => {
                    header(&format!("Key pair for SP {}", sp_id));
                    field("Algorithm", Some(kp.encryption_algorithm.as_str()));
                    println!();
                    println!("{}", kp.public_key);
                }
                None => println!("{} No key pair for SP {}.", Icons::EMPTY, sp_id),
            }
        }

        KeyCommand::Set {
            public,
            private,
            sp,
        } => {
            let public_key = std::fs::read_to_string(&public)?;
            let private_key = std::fs::read_to_string(&private)?;
            let outcome = store.upsert_keypair(&public_key, &private_key, sp)?;

            if !output_mode.is_human() {
                return emit_success(output_mode, "key.set", serde_json::to_value(outcome)?);
            }
            match outcome {
                UpsertOutcome::Inserted { sp_id } => {
                    success(&format!("{} Stored key pair for SP {}", Icons::KEY, sp_id))
                }
                UpsertOutcome::Updated { sp_id, .. } => {
                    success(&format!("{} Replaced key pair for SP {}", Icons::KEY, sp_id))
                }
                UpsertOutcome::Skipped => {
                    warn("No service provider configured; key pair not stored")
                }
            }
        }

        KeyCommand::Delete { sp_id } => {
            let removed = store.delete_keypair(sp_id)?;
            if output_mode.is_human() {
                println!("{} Removed {} key pair(s)", Icons::DEL, removed);
            } else {
                emit_success(output_mode, "key.delete", serde_json::json!({ "removed": removed }))?;
            }
        }
    }
    Ok(())
}

pub fn run_reset(store: &SpStore, output_mode: OutputMode, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("Reset deletes all SP configuration; re-run with --yes to confirm");
    }
    store.reset_all()?;

    if output_mode.is_human() {
        success("Cleared all service providers, attribute mappings and key pairs");
    } else {
        emit_success(output_mode, "reset", serde_json::json!({}))?;
    }
    Ok(())
}

pub fn run_meta_keys(store: &SpStore, output_mode: OutputMode) -> anyhow::Result<()> {
    let keys = store.list_distinct_user_attribute_keys()?;

    if !output_mode.is_human() {
        return emit_success(output_mode, "meta-keys", serde_json::to_value(&keys)?);
    }
    if keys.is_empty() {
        println!("{} No user attributes found.", Icons::EMPTY);
    } else {
        for key in keys {
            println!("  {} {}", Icons::PERSON, key);
        }
    }
    Ok(())
}

fn print_sp(sp: &ServiceProvider) {
    header(&format!("{} (id {})", sp.name, sp.id));
    field("Protocol", Some(sp.protocol.as_str()));
    field("Issuer", Some(sp.issuer.as_str()));
    field("ACS URL", Some(sp.acs_url.as_str()));
    field("NameID format", Some(sp.nameid_format.as_str()));
    field("NameID attribute", Some(sp.nameid_attr.as_str()));
    field("Signing cert", sp.signing_cert.as_ref().map(|_| "present"));
    field("Encryption cert", sp.encryption_cert.as_ref().map(|_| "present"));
    field("Response signed", Some(yes_no(sp.response_signed)));
    field("Assertion signed", Some(yes_no(sp.assertion_signed)));
    field("Assertion encrypted", Some(yes_no(sp.assertion_encrypted)));
    field("Group mapping", Some(yes_no(sp.group_mapping_enabled)));
    field("Default relay state", sp.default_relay_state.as_deref());
    field("Logout URL", sp.logout_url.as_deref());
    field("Logout binding", Some(sp.logout_binding.as_str()));
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn read_cert(path: &Option<std::path::PathBuf>) -> anyhow::Result<Option<String>> {
    path.as_ref()
        .map(|p| std::fs::read_to_string(p).map(|s| s.trim().to_string()))
        .transpose()
        .map_err(Into::into)
}

fn new_sp_from(mut new: NewServiceProvider, options: SpOptions) -> anyhow::Result<NewServiceProvider> {
    let patch = patch_from(options)?;

    if let Some(v) = patch.nameid_format {
        new.nameid_format = v;
    }
    if let Some(v) = patch.nameid_attr {
        new.nameid_attr = v;
    }
    new.signing_cert = patch.signing_cert.flatten();
    new.encryption_cert = patch.encryption_cert.flatten();
    new.default_relay_state = patch.default_relay_state.flatten();
    new.logout_url = patch.logout_url.flatten();
    new.logout_binding = patch.logout_binding.unwrap_or_default();
    new.protocol = patch.protocol.unwrap_or_default();
    new.response_signed = patch.response_signed.unwrap_or(false);
    new.assertion_signed = patch.assertion_signed.unwrap_or(false);
    new.assertion_encrypted = patch.assertion_encrypted.unwrap_or(false);
    new.group_mapping_enabled = patch.group_mapping_enabled.unwrap_or(false);
    Ok(new)
}

fn patch_from(options: SpOptions) -> anyhow::Result<SpPatch> {
    Ok(SpPatch {
        nameid_format: options.nameid_format,
        nameid_attr: options.nameid_attr,
        signing_cert: read_cert(&options.signing_cert)?.map(Some),
        encryption_cert: read_cert(&options.encryption_cert)?.map(Some),
        default_relay_state: options.relay_state.map(Some),
        logout_url: options.logout_url.map(Some),
        logout_binding: options.logout_binding.map(|b| b.parse::<LogoutBinding>()).transpose()?,
        protocol: options.protocol.map(|p| p.parse::<Protocol>()).transpose()?,
        response_signed: options.sign_response,
        assertion_signed: options.sign_assertion,
        assertion_encrypted: options.encrypt_assertion,
        group_mapping_enabled: options.group_mapping,
        ..SpPatch::default()
    })
}
