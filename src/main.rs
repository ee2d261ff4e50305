fn main() {
    slidesafe::run();
}
