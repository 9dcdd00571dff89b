use coinlib::{crypto::PrivateKey, error::Result, types::RewardAddress, util::Saveable};
use std::env;

fn main() -> Result<()> {
    let Some(name) = env::args().nth(1) else {
        eprintln!("Usage: key_gen <name>");
        std::process::exit(1);
    };

    let private_key = PrivateKey::new_key();
    let public_key = private_key.public_key();

    private_key.save_to_file(format!("{name}.priv.cbor"))?;
    public_key.save_to_file(format!("{name}.pub.pem"))?;

    println!("{}", RewardAddress::from_public_key(&public_key)?);
    Ok(())
}
