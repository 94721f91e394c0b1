use continuations::{ContinuationStore, EngineScope, Payload};
use log::info;
use serde_json::{json, Value};
use std::error::Error;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

const ENGINE_TAG: &str = "cli";

/// Pequeño menú interactivo para inspeccionar y manipular el almacén de
/// continuaciones. El barrido periódico corre en segundo plano mientras el
/// menú está abierto.
///
/// Opciones soportadas:
/// 1) Ver bosque (árbol con id, tag y último acceso)
/// 2) Crear continuación raíz
/// 3) Reanudar desde una continuación existente (crear hija)
/// 4) Buscar continuación (refresca su acceso)
/// 5) Invalidar continuación (y sus descendientes)
/// 6) Fijar atributo
/// 7) Barrer ahora
/// 8) Exportar bosque como JSON
/// 9) Salir
fn main() -> Result<(), Box<dyn Error>> {
    // RUST_LOG controla el nivel; los registros de `log` del crate se
    // reenvían al subscriber.
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let store = ContinuationStore::from_env()?;
    let rt = tokio::runtime::Runtime::new()?;
    store.start_on(rt.handle());
    info!("almacen iniciado con {:?}", store.config());
    let engine = store.bind(ENGINE_TAG);

    loop {
        println!("\n== Menú de continuaciones ==");
        println!("1) Ver bosque");
        println!("2) Crear continuación raíz");
        println!("3) Reanudar desde una continuación (crear hija)");
        println!("4) Buscar continuación");
        println!("5) Invalidar continuación");
        println!("6) Fijar atributo");
        println!("7) Barrer ahora");
        println!("8) Exportar bosque como JSON");
        println!("9) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        if io::stdin().read_line(&mut choice)? == 0 {
            break;
        }
        match choice.trim() {
            "1" => print!("{}", store.forest().display()),
            "2" => {
                let payload = prompt_payload("Payload (JSON o texto simple): ")?;
                match engine.start(payload) {
                    Ok(node) => println!("Continuación creada: {}", node.id()),
                    Err(e) => eprintln!("Error creando continuación: {}", e),
                }
            }
            "3" => {
                let parent = prompt("Id de la continuación padre: ")?;
                let payload = prompt_payload("Payload (JSON o texto simple): ")?;
                match engine.resume_from(parent.trim(), payload) {
                    Ok(node) => println!("Continuación hija creada: {} (padre {})", node.id(), parent.trim()),
                    Err(e) => eprintln!("Error reanudando: {}", e),
                }
            }
            "4" => show(&engine, prompt("Id a buscar: ")?.trim()),
            "5" => {
                let id = prompt("Id a invalidar: ")?;
                let confirm = prompt(&format!("Confirma invalidar {} y sus descendientes? escribir 'yes': ", id.trim()))?;
                if confirm.trim().to_lowercase() == "yes" {
                    match engine.invalidate(id.trim()) {
                        Ok(()) => println!("Continuación invalidada: {}", id.trim()),
                        Err(e) => eprintln!("Error invalidando: {}", e),
                    }
                } else {
                    println!("Invalidación cancelada");
                }
            }
            "6" => {
                let id = prompt("Id de la continuación: ")?;
                let key = prompt("Nombre del atributo: ")?;
                let value = prompt("Valor (JSON o texto simple): ")?;
                match engine.lookup(id.trim()) {
                    Ok(node) => {
                        node.set_attribute(key.trim(), parse_value(&value));
                        println!("Atributo '{}' fijado en {}", key.trim(), node.id());
                    }
                    Err(e) => eprintln!("Error buscando continuación: {}", e),
                }
            }
            "7" => {
                let report = store.sweep_now();
                println!("Examinadas: {} | expiradas: {} | eliminadas: {} | fallos: {}",
                         report.examined,
                         report.expired,
                         report.removed,
                         report.faults.len());
            }
            "8" => match serde_json::to_string_pretty(&store.forest_snapshot()) {
                Ok(text) => println!("{}", text),
                Err(e) => eprintln!("Error serializando: {}", e),
            },
            "9" => {
                println!("Saliendo...");
                break;
            }
            other => println!("Opción inválida: {}", other),
        }
    }

    match rt.block_on(store.shutdown()) {
        Ok(removed) => println!("Continuaciones liberadas al salir: {}", removed),
        Err(e) => eprintln!("Cierre con errores: {}", e),
    }
    Ok(())
}

fn show(engine: &EngineScope, id: &str) {
    match engine.lookup(id) {
        Ok(node) => {
            let payload = node.payload_as::<Value>().map(|v| v.to_string()).unwrap_or_else(|| "<opaco>".into());
            println!("Id: {}", node.id());
            println!("Padre: {}", node.parent_id().unwrap_or("-"));
            println!("Hijas: {}", node.child_count());
            println!("Payload: {}", payload);
            println!("Último acceso: {}", node.last_access().to_rfc3339());
            println!("Expira: {}", node.expires_at().to_rfc3339());
            for name in node.attribute_names() {
                if let Some(v) = node.attribute(&name) {
                    println!("  {} = {}", name, v);
                }
            }
        }
        Err(e) => eprintln!("{}", e),
    }
}

fn prompt_payload(msg: &str) -> io::Result<Payload> {
    let raw = prompt(msg)?;
    Ok(Payload::new(parse_value(&raw)))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| json!(raw.trim()))
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
