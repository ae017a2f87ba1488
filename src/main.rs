use std::collections::BTreeSet;
use std::env;
use std::error::Error;

use csv::Trim;
use ledger::{Ledger, Output};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Deserialize, Clone, Debug)]
enum Action {
    #[serde(rename = "genesis")]
    Genesis,
    #[serde(rename = "credit")]
    Credit,
    #[serde(rename = "transfer")]
    Transfer,
    #[serde(rename = "debit")]
    Debit,
}

#[derive(Deserialize, Clone, Debug)]
struct CsvEntry {
    #[serde(rename = "type")]
    typ: Action,
    id: Option<String>,
    from: Option<String>,
    to: Option<String>,
    amount: Option<i64>,
    #[serde(default)]
    fee: i64,
}

#[derive(Serialize, Clone, Debug)]
struct CsvBalance {
    owner: String,
    balance: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <operations.csv>", args[0]);
        std::process::exit(1);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(&args[1])?;

    let mut ledger = Ledger::in_memory();
    let mut owners = BTreeSet::new();

    for (line, result) in reader.deserialize::<CsvEntry>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                eprintln!("Failed to parse line {line}: {err:?}");
                continue;
            }
        };

        if let Some(owner) = &record.from {
            owners.insert(owner.clone());
        }
        if let Some(owner) = &record.to {
            owners.insert(owner.clone());
        }

        let outcome = match record.typ {
            Action::Genesis => {
                let (Some(owner), Some(amount)) = (&record.to, record.amount) else {
                    eprintln!("genesis at line {line} needs a 'to' and an 'amount'");
                    continue;
                };
                let output = match record.id.clone() {
                    Some(id) => Output::owned_by(id, amount, owner.as_str()),
                    None => Output::signed_by(amount, owner.as_str()),
                };
                match output {
                    Ok(output) => ledger.clone().add_genesis(vec![output]).await,
                    Err(err) => Err(err),
                }
            }
            Action::Credit => {
                let (Some(owner), Some(amount)) = (&record.to, record.amount) else {
                    eprintln!("credit at line {line} needs a 'to' and an 'amount'");
                    continue;
                };
                ledger.credit(owner.as_str(), amount, record.id.clone()).await
            }
            Action::Transfer => {
                let (Some(from), Some(to), Some(amount)) =
                    (&record.from, &record.to, record.amount)
                else {
                    eprintln!("transfer at line {line} needs 'from', 'to' and 'amount'");
                    continue;
                };
                ledger.transfer(from.as_str(), to.as_str(), amount, record.fee).await
            }
            Action::Debit => {
                let (Some(from), Some(amount)) = (&record.from, record.amount) else {
                    eprintln!("debit at line {line} needs a 'from' and an 'amount'");
                    continue;
                };
                ledger.debit(from.as_str(), amount, record.fee).await
            }
        };

        match outcome {
            Ok(next) => ledger = next,
            Err(err) => eprintln!("Error processing {record:?} with {err}"),
        }
    }

    let mut wtr = csv::Writer::from_writer(std::io::stdout());
    for owner in owners {
        let balance = ledger.total_unspent_by_owner(&owner).value();
        if let Err(err) = wtr.serialize(CsvBalance { owner, balance }) {
            eprintln!("Error serializing balance: {err:?}");
        }
    }

    Ok(())
}
