fn main() {
    beacon::run();
}
