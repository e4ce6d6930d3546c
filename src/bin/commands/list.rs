use virtual_input::keys;

pub fn list() {
    for name in keys::key_names() {
        println!("{name}");
    }
}
