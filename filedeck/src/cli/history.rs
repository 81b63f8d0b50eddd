use std::path::Path;

use client::{HISTORY_CAPACITY, HistorySink, JsonFileHistory};

fn open(path: &Path) -> JsonFileHistory {
    match JsonFileHistory::open(path, HISTORY_CAPACITY) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

pub fn list(path: &Path) {
    let entries = open(path).list();
    println!("{}", client::history_table(&entries));
}

pub fn unfinished(path: &Path) {
    let entries = open(path).unfinished();
    if entries.is_empty() {
        println!("every upload finished");
        return;
    }
    println!("{}", client::history_table(&entries));
}

pub fn clear(path: &Path) {
    match open(path).clear() {
        Ok(()) => println!("history cleared"),
        Err(e) => eprintln!("{e}"),
    }
}

pub fn discard(path: &Path) {
    match open(path).discard_unfinished() {
        Ok(n) => println!("{n} unfinished upload(s) forgotten"),
        Err(e) => eprintln!("{e}"),
    }
}
