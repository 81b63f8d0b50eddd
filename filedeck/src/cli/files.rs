use client::{Api, ClientError};

fn connect(uri: &str) -> Api {
    match Api::new(uri) {
        Ok(api) => api,
        Err(e) => fail(&e),
    }
}

fn fail(e: &ClientError) -> ! {
    eprintln!("error: {e}");
    std::process::exit(1);
}

pub async fn list_folders(uri: &str) {
    match connect(uri).folders().await {
        Ok(folders) => println!("{}", client::folders_table(&folders)),
        Err(e) => fail(&e),
    }
}

pub async fn list_files(uri: &str, prefix: &str) {
    match connect(uri).files(prefix).await {
        Ok(files) => println!("{}", client::files_table(&files)),
        Err(e) => fail(&e),
    }
}

pub async fn delete(uri: &str, key: &str) {
    match connect(uri).delete(key).await {
        Ok(()) => println!("{key} deleted"),
        Err(e) => fail(&e),
    }
}

pub async fn link(uri: &str, key: &str) {
    match connect(uri).download_link(key).await {
        Ok(url) => println!("{url}"),
        Err(e) => fail(&e),
    }
}

pub async fn config(uri: &str) {
    match connect(uri).storage_config().await {
        Ok(c) => {
            println!("Backend        : {}", c.backend);
            println!("Bucket         : {}", c.bucket.as_deref().unwrap_or("(none)"));
            println!("Can list files : {}", c.can_list_files);
        }
        Err(e) => fail(&e),
    }
}
