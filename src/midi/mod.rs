// MIDI module - clock/trigger input and note output over midir

pub mod event;
pub mod input;
pub mod output;

use midir::MidiIO;

/// Pick a port by index ("2") or by case-insensitive name fragment.
/// Without a selector the first port is used.
pub(crate) fn find_port<T: MidiIO>(io: &T, selector: Option<&str>) -> Option<(T::Port, String)> {
    let ports = io.ports();

    let index = match selector {
        None => 0,
        Some(selector) => match selector.trim().parse::<usize>() {
            Ok(index) => index,
            Err(_) => {
                let needle = selector.to_lowercase();
                ports.iter().position(|port| {
                    io.port_name(port)
                        .map(|name| name.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })?
            }
        },
    };

    let port = ports.into_iter().nth(index)?;
    let name = io
        .port_name(&port)
        .unwrap_or_else(|_| "Unknown".to_string());
    Some((port, name))
}

/// Names of every port on this MIDI interface
pub(crate) fn port_names<T: MidiIO>(io: &T) -> Vec<String> {
    io.ports()
        .iter()
        .filter_map(|port| io.port_name(port).ok())
        .collect()
}
