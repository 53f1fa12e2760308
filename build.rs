#[cfg(all(target_os = "windows", feature = "packetcapture"))]
use std::env;
#[cfg(all(target_os = "windows", feature = "packetcapture"))]
use std::path::Path;

fn main() {
    // libpcap is linked by the pcap crate on unix; Windows needs the Npcap SDK
    #[cfg(all(target_os = "windows", feature = "packetcapture"))]
    {
        println!("cargo:rerun-if-env-changed=NPCAP_SDK_PATH");

        if let Ok(npcap_path) = env::var("NPCAP_SDK_PATH") {
            println!("cargo:rustc-link-search=native={}/Lib/x64", npcap_path);
            println!("cargo:rustc-link-lib=static=Packet");
            println!("cargo:rustc-link-lib=static=wpcap");
        } else {
            println!("cargo:warning=NPCAP_SDK_PATH not set, downloading Npcap SDK");

            let out_dir = match env::var("OUT_DIR") {
                Ok(dir) => dir,
                Err(e) => {
                    println!("cargo:warning=OUT_DIR unavailable: {}", e);
                    return;
                }
            };
            let npcap_dir = Path::new(&out_dir).join("npcap");

            if !npcap_dir.exists() {
                if let Err(e) = fetch_npcap_sdk(&npcap_dir) {
                    println!("cargo:warning=Npcap SDK download failed: {}", e);
                }
            }

            if npcap_dir.exists() {
                println!(
                    "cargo:rustc-link-search=native={}/Lib/x64",
                    npcap_dir.display()
                );
                println!("cargo:rustc-link-lib=static=Packet");
                println!("cargo:rustc-link-lib=static=wpcap");
            }
        }
    }
}

#[cfg(all(target_os = "windows", feature = "packetcapture"))]
fn fetch_npcap_sdk(npcap_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let url = "https://npcap.com/dist/npcap-sdk-1.13.zip";

    let bytes = reqwest::blocking::get(url)?.error_for_status()?.bytes()?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let outpath = npcap_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = std::fs::File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }
    }

    Ok(())
}
