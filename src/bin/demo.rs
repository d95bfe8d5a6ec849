use phone_vault::{
    EnvelopeCipher, InMemoryRecordStore, KeyClientRegistry, KeyHandle, KeyPurpose, LocalKmsClient,
    RecordService, RecordStore, SecureKey,
};
use std::sync::Arc;
use uuid::Uuid;

const KEY_PATH: &str = "projects/demo/locations/global/keyRings/demo/cryptoKeys/phone";

fn preview(encoded: &str) -> String {
    if encoded.len() > 16 {
        format!("{}...{}", &encoded[..8], &encoded[encoded.len() - 4..])
    } else {
        encoded.to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Phone Vault: envelope encryption via a key service ===\n");

    let mut registry = KeyClientRegistry::new();
    registry.register(KeyHandle::new(
        KeyPurpose::PhoneEncryption,
        KEY_PATH,
        Arc::new(LocalKmsClient::new(SecureKey::generate())),
    ))?;
    println!("[INIT] Purpose: {}", KeyPurpose::PhoneEncryption);
    println!("[INIT] Key path: {}", KEY_PATH);
    println!("[INIT] Backend: local AES-256-GCM (stand-in for Cloud KMS)\n");

    let store = Arc::new(InMemoryRecordStore::new());
    let service = RecordService::new(Arc::new(registry), EnvelopeCipher::default(), store.clone());

    let phone = "+15551234567";
    let first = service.submit(phone).await?;
    let second = service.submit(phone).await?;

    println!("[SUBMIT] Record 1 ID: {}", first.id);
    println!("[SUBMIT] Record 1 payload: {}", preview(&first.encrypted_data));
    println!("[SUBMIT] Record 2 ID: {}", second.id);
    println!("[SUBMIT] Record 2 payload: {}", preview(&second.encrypted_data));
    println!(
        "[NOTE] Same number, different ciphertext: {}\n",
        first.encrypted_data != second.encrypted_data
    );

    let stored = store.get_by_id(&first.id).await?;
    let leaked = stored
        .map(|r| r.encrypted_data.contains(phone))
        .unwrap_or(false);
    println!("[STORE] Stored row holds plaintext: {}", leaked);
    println!("[STORE] Records stored: {}\n", store.len());

    let fetched = service.fetch(&first.id).await?;
    println!("[FETCH] ID: {}", fetched.id);
    println!("[FETCH] Phone number: {}", fetched.phone_number);
    println!("[FETCH] Created at: {}\n", fetched.created_at);

    match service.fetch(&Uuid::nil()).await {
        Ok(_) => println!("[FETCH] Unexpected record for nil id"),
        Err(err) => println!("[FETCH] Nil id: {}", err),
    }

    println!("\n=== Flow Summary ===");
    println!("- Plaintext is sent to the key service, never stored");
    println!("- Ciphertext is stored as base64 text");
    println!("- Every read decrypts through the key service again");
    Ok(())
}
