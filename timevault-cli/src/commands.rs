use std::{fmt::Display, path::Path, sync::Arc};

use alloy::signers::local::PrivateKeySigner;
use eyre::{bail, eyre, WrapErr};
use secrecy::{ExposeSecret, SecretString};
use timevault_core::{
    clock::{Clock, SystemClock},
    config::Config,
    creation::{CreatedVault, CreationAssembler, VaultRequest},
    derivation::derive_reveal_key,
    ledger::EvmLedger,
    lifecycle::{LifecycleState, Transition, WithdrawalLifecycle},
    reader::VaultStateReader,
    reveal::RevealClient,
    store::{PinataCredentials, PinataStore},
    ContentHash, VaultId,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::info;

use crate::{Cli, Command, ConnectionArgs};

/// Resolved connection settings.
struct Context {
    config: Config,
    private_key: Option<SecretString>,
    pinata: Option<PinataCredentials>,
}

impl Context {
    fn from_args(args: ConnectionArgs) -> eyre::Result<Self> {
        let config = load_config(&args)?;
        let pinata = match (args.pinata_api_key, args.pinata_secret_key) {
            (Some(api_key), Some(secret_key)) => Some(PinataCredentials {
                api_key,
                secret_key: SecretString::from(secret_key),
            }),
            _ => None,
        };
        Ok(Self {
            config,
            private_key: args.private_key.map(SecretString::from),
            pinata,
        })
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    /// Ledger for reads. Without a configured key a throwaway one is used since
    /// nothing gets signed.
    fn read_ledger(&self) -> eyre::Result<Arc<EvmLedger>> {
        let signer = match &self.private_key {
            Some(key) => parse_signer(key)?,
            None => PrivateKeySigner::random(),
        };
        self.connect(signer)
    }

    fn write_ledger(&self) -> eyre::Result<Arc<EvmLedger>> {
        let key = self
            .private_key
            .as_ref()
            .ok_or_else(|| eyre!("TIMEVAULT_PRIVATE_KEY is required to send transactions"))?;
        self.connect(parse_signer(key)?)
    }

    fn connect(&self, signer: PrivateKeySigner) -> eyre::Result<Arc<EvmLedger>> {
        let ledger = EvmLedger::connect(
            self.config.rpc_url(),
            self.config.contract_address,
            signer,
            self.config.confirmations,
        )?;
        info!(
            network = %self.config.network,
            chain_id = self.config.network.chain_id(),
            contract = %self.config.contract_address,
            "connected"
        );
        Ok(Arc::new(ledger))
    }

    fn reader(ledger: &Arc<EvmLedger>) -> VaultStateReader<EvmLedger> {
        VaultStateReader::new(Arc::clone(ledger), Self::clock())
    }

    fn pinning_store(&self) -> eyre::Result<Arc<PinataStore>> {
        let credentials = self
            .pinata
            .clone()
            .ok_or_else(|| eyre!("PINATA_API_KEY and PINATA_SECRET_KEY are required to upload"))?;
        Ok(Arc::new(PinataStore::new(credentials, &self.config.gateway_url)))
    }
}

fn parse_signer(key: &SecretString) -> eyre::Result<PrivateKeySigner> {
    key.expose_secret()
        .trim()
        .parse()
        .map_err(|_| eyre!("TIMEVAULT_PRIVATE_KEY is not a valid private key"))
}

/// Config file if given, with `--rpc-url` and `--contract` applied on top;
/// otherwise built from flags alone.
fn load_config(args: &ConnectionArgs) -> eyre::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading config {}", path.display()))?;
            Config::from_json(&json)?
        }
        None => {
            let contract = args
                .contract_address
                .ok_or_else(|| eyre!("--contract or TIMEVAULT_CONTRACT_ADDRESS is required"))?;
            let mut config = Config::new(args.network, contract);
            config.gateway_url.clone_from(&args.gateway_url);
            config.finalization_timeout_secs = args.timeout_secs;
            config.confirmations = args.confirmations;
            config
        }
    };
    if let Some(rpc_url) = &args.rpc_url {
        config.rpc_url = Some(rpc_url.clone());
    }
    if let Some(contract) = args.contract_address {
        config.contract_address = contract;
    }
    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> eyre::Result<Vec<u8>> {
    std::fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))
}

/// Spawns a task logging lifecycle transitions as they arrive. The task ends
/// once every sender is dropped and yields how many transitions it saw.
fn progress_printer(vault_id: VaultId) -> (mpsc::UnboundedSender<Transition>, JoinHandle<usize>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Transition>();
    let printer = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(transition) = receiver.recv().await {
            info!(state = %transition.state, tx = ?transition.tx_hash, "vault {vault_id}");
            seen += 1;
        }
        seen
    });
    (sender, printer)
}

/// Error for a vault that was created but whose hidden content was not sealed.
fn seal_failed(created: &CreatedVault, file: &Path, error: &impl Display) -> eyre::Report {
    match created.vault_id {
        Some(vault_id) => eyre!(
            "vault {vault_id} was created in {} but sealing its hidden content failed: {error}; \
             retry with `timevault seal --vault-id {vault_id} --file {}`",
            created.tx_hash,
            file.display()
        ),
        None => eyre!(
            "vault was created in {} but sealing its hidden content failed: {error}; \
             look up the vault id, then run `timevault seal --vault-id <ID> --file {}`",
            created.tx_hash,
            file.display()
        ),
    }
}

pub async fn run(cli: Cli) -> eyre::Result<()> {
    // Offline: needs neither a contract nor a network.
    if let Command::DeriveKey {
        vault_id,
        unlock_time,
    } = &cli.command
    {
        println!("{}", derive_reveal_key(*vault_id, *unlock_time).to_hex());
        return Ok(());
    }

    let ctx = Context::from_args(cli.connection)?;
    let timeout = ctx.config.finalization_timeout();

    match cli.command {
        Command::DeriveKey { .. } => Ok(()),
        Command::Status { vault_id } => {
            let ledger = ctx.read_ledger()?;
            let snapshot = Context::reader(&ledger).read(vault_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Create {
            image,
            amount,
            unlock_time,
            recipient,
            gas_reserve,
            hidden,
        } => {
            let plaintext = hidden.as_deref().map(read_file).transpose()?;
            let ledger = ctx.write_ledger()?;
            let store = ctx.pinning_store()?;
            let assembler = CreationAssembler::new(
                Arc::clone(&ledger),
                Arc::clone(&store),
                Context::clock(),
                timeout,
                ctx.config.network,
            );

            let created = assembler
                .create_with_content(VaultRequest {
                    image: read_file(&image)?,
                    amount,
                    unlock_time,
                    recipient,
                    gas_reserve,
                    hidden_content: plaintext.is_some(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&created)?);

            if let (Some(plaintext), Some(path)) = (plaintext, hidden) {
                let Some(vault_id) = created.vault_id else {
                    return Err(seal_failed(&created, &path, &"receipt has no VaultCreated event"));
                };
                let client = RevealClient::new(Context::reader(&ledger), store);
                let hash = client
                    .seal(vault_id, &plaintext)
                    .await
                    .map_err(|e| seal_failed(&created, &path, &e))?;
                println!("hidden content: {hash} (share with the recipient after unlock)");
            }
            Ok(())
        }
        Command::Withdraw { vault_id, resume } => {
            let ledger = ctx.write_ledger()?;
            let reader = Context::reader(&ledger);
            let session = if resume {
                WithdrawalLifecycle::resume(ledger, reader, vault_id, timeout).await?
            } else {
                WithdrawalLifecycle::prepare(ledger, reader, vault_id, timeout).await?
            };

            let (sender, printer) = progress_printer(vault_id);

            let mut session = session.with_progress(sender);
            let final_state = session.run().await;
            drop(session);
            printer.await?;

            match final_state {
                LifecycleState::Done => {
                    println!("vault {vault_id} withdrawn and settled");
                    Ok(())
                }
                LifecycleState::Failed(failure) => bail!("vault {vault_id}: {failure}"),
                other => bail!("vault {vault_id} stopped in {other}"),
            }
        }
        Command::Seal { vault_id, file } => {
            let plaintext = read_file(&file)?;
            let ledger = ctx.read_ledger()?;
            let client = RevealClient::new(Context::reader(&ledger), ctx.pinning_store()?);
            let hash = client.seal(vault_id, &plaintext).await?;
            println!("{hash}");
            Ok(())
        }
        Command::Reveal {
            vault_id,
            hash,
            out,
        } => {
            let ledger = ctx.read_ledger()?;
            let store = Arc::new(PinataStore::read_only(&ctx.config.gateway_url));
            let client = RevealClient::new(Context::reader(&ledger), store);
            let plaintext = client.reveal(vault_id, &ContentHash::new(hash)).await?;
            std::fs::write(&out, &plaintext)
                .wrap_err_with(|| format!("writing {}", out.display()))?;
            println!("revealed {} bytes to {}", plaintext.len(), out.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use alloy_primitives::TxHash;
    use clap::Parser;
    use timevault_core::config::Network;

    use super::*;

    #[test]
    fn test_config_from_flags() {
        let cli = Cli::try_parse_from([
            "timevault",
            "--contract",
            "0x1111111111111111111111111111111111111111",
            "--network",
            "base-sepolia",
            "--timeout-secs",
            "45",
            "status",
            "--vault-id",
            "1",
        ])
        .unwrap();

        let config = load_config(&cli.connection).unwrap();
        assert_eq!(config.network, Network::BaseSepolia);
        assert_eq!(config.rpc_url(), "https://sepolia.base.org");
        assert_eq!(config.finalization_timeout_secs, 45);
    }

    #[test]
    fn test_config_file_with_rpc_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"network":"base-sepolia","contractAddress":"0x2222222222222222222222222222222222222222","confirmations":2}}"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from([
            "timevault",
            "--config",
            &path,
            "--rpc-url",
            "https://rpc.example",
            "status",
            "--vault-id",
            "1",
        ])
        .unwrap();

        let config = load_config(&cli.connection).unwrap();
        assert_eq!(config.network, Network::BaseSepolia);
        assert_eq!(config.confirmations, 2);
        assert_eq!(config.rpc_url(), "https://rpc.example");
    }

    #[tokio::test]
    async fn test_progress_printer_drains_until_sender_dropped() {
        let (sender, printer) = progress_printer(VaultId::from(7u64));
        sender
            .send(Transition {
                state: LifecycleState::AwaitingBurn,
                tx_hash: Some(TxHash::repeat_byte(1)),
            })
            .unwrap();
        sender
            .send(Transition {
                state: LifecycleState::Done,
                tx_hash: Some(TxHash::repeat_byte(2)),
            })
            .unwrap();
        drop(sender);

        assert_eq!(printer.await.unwrap(), 2);
    }

    #[test]
    fn test_seal_failure_points_at_existing_vault() {
        let created = CreatedVault {
            tx_hash: TxHash::repeat_byte(0xab),
            vault_id: Some(VaultId::from(12u64)),
            token_uri: "ipfs://QmMeta".to_string(),
        };

        let message = seal_failed(&created, Path::new("note.txt"), &"store offline").to_string();

        assert!(message.contains("vault 12 was created"));
        assert!(message.contains("store offline"));
        assert!(message.contains("timevault seal --vault-id 12 --file note.txt"));
    }

    #[test]
    fn test_seal_failure_without_vault_id() {
        let created = CreatedVault {
            tx_hash: TxHash::repeat_byte(0xab),
            vault_id: None,
            token_uri: "ipfs://QmMeta".to_string(),
        };

        let message = seal_failed(&created, Path::new("note.txt"), &"no event").to_string();

        assert!(message.contains("vault was created"));
        assert!(message.contains("--vault-id <ID> --file note.txt"));
    }
}
